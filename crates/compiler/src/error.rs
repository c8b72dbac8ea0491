//! Error types for the compiler facade and its configuration.

use std::fmt;
use std::path::PathBuf;

use ireec_dl::{Diagnostic, PipelineKind};
use thiserror::Error;

/// Errors raised by [`Compiler`](crate::Compiler) and [`Pipeline`](crate::Pipeline).
#[derive(Debug, Error)]
pub enum Error {
	/// Failure in the binding layer, including hard compiler errors.
	#[error(transparent)]
	Dl(#[from] ireec_dl::Error),

	/// The source did not parse.
	#[error("error parsing source {name}{}", DiagnosticList(diagnostics))]
	Parse {
		/// Buffer name or file path of the source.
		name: String,
		/// Diagnostics captured while parsing; empty when they went to the console.
		diagnostics: Vec<Diagnostic>,
	},

	/// The pipeline did not complete.
	#[error("error running {kind} pipeline{}", DiagnosticList(diagnostics))]
	Pipeline {
		/// Pipeline that failed.
		kind: PipelineKind,
		/// Diagnostics captured while the pipeline ran.
		diagnostics: Vec<Diagnostic>,
	},

	/// The configuration could not be loaded.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	/// Diagnostics attached to a soft failure, if any.
	pub fn diagnostics(&self) -> &[Diagnostic] {
		match self {
			Self::Parse { diagnostics, .. } | Self::Pipeline { diagnostics, .. } => diagnostics,
			_ => &[],
		}
	}
}

/// Renders captured diagnostics after the error headline, or a pointer to the
/// console when nothing was captured.
struct DiagnosticList<'a>(&'a [Diagnostic]);

impl fmt::Display for DiagnosticList<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return f.write_str(" (see diagnostics)");
		}
		f.write_str(":")?;
		for diagnostic in self.0 {
			write!(f, "\n  {diagnostic}")?;
		}
		Ok(())
	}
}

/// Errors that can occur when loading a [`CompilerConfig`](crate::CompilerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing KDL syntax.
	#[error("KDL parse error: {0}")]
	Kdl(#[from] kdl::KdlError),

	/// Error reading a configuration file.
	#[error("I/O error reading {}: {error}", path.display())]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A node carries a value of the wrong shape.
	#[error("invalid value for '{key}': {reason}")]
	InvalidValue {
		/// Node name.
		key: String,
		/// What was expected.
		reason: String,
	},

	/// A top-level node is not a known setting.
	#[error("unknown setting: {0}")]
	UnknownKey(String),
}
