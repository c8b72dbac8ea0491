//! Compiler configuration in KDL.
//!
//! ```kdl
//! library "/opt/iree/lib/libIREECompiler.so"
//! flags "--iree-hal-target-backends=vmvx" "--iree-input-type=none"
//! diagnostics "capture"
//! ```
//!
//! Every node is optional. `flags` may repeat; values accumulate in order.

use std::path::{Path, PathBuf};

use kdl::{KdlDocument, KdlNode};

use crate::error::ConfigError;

/// Where parse and pipeline diagnostics go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiagnosticsMode {
	/// Collect diagnostics into the pipeline and its errors, falling back to
	/// the console when the library cannot capture them.
	#[default]
	Capture,
	/// Let the compiler print diagnostics itself.
	Console,
	/// Enable no diagnostics sink.
	Off,
}

impl DiagnosticsMode {
	fn parse(value: &str) -> Option<Self> {
		match value {
			"capture" => Some(Self::Capture),
			"console" => Some(Self::Console),
			"off" => Some(Self::Off),
			_ => None,
		}
	}
}

/// Settings for a [`Compiler`](crate::Compiler).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerConfig {
	/// Resolved path of the compiler shared library. When unset, the binding
	/// layer falls back to `IREE_COMPILER_LIB`.
	pub library: Option<PathBuf>,
	/// Flags applied to every new session, in order.
	pub flags: Vec<String>,
	/// Diagnostics routing for pipelines.
	pub diagnostics: DiagnosticsMode,
}

impl CompilerConfig {
	/// Parses a KDL document.
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		let doc: KdlDocument = input.parse()?;
		let mut config = Self::default();

		for node in doc.nodes() {
			match node.name().value() {
				"library" => config.library = Some(PathBuf::from(single_string(node)?)),
				"flags" => config.flags.extend(flag_list(node)?),
				"diagnostics" => {
					let value = single_string(node)?;
					config.diagnostics = DiagnosticsMode::parse(value).ok_or_else(|| ConfigError::InvalidValue {
						key: "diagnostics".to_string(),
						reason: format!("expected \"capture\", \"console\" or \"off\", got {value:?}"),
					})?;
				}
				other => return Err(ConfigError::UnknownKey(other.to_string())),
			}
		}

		Ok(config)
	}

	/// Loads configuration from a file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
			path: path.to_path_buf(),
			error: e,
		})?;
		Self::parse(&content)
	}

	/// Lets `IREE_COMPILER_LIB` override the configured library path.
	pub fn with_env(self) -> Self {
		self.with_library_override(std::env::var_os(ireec_dl::LIBRARY_ENV).map(PathBuf::from))
	}

	fn with_library_override(mut self, library: Option<PathBuf>) -> Self {
		if let Some(library) = library.filter(|path| !path.as_os_str().is_empty()) {
			tracing::debug!(library = %library.display(), "Compiler library overridden from environment");
			self.library = Some(library);
		}
		self
	}
}

/// Returns the only argument of `node`, which must be a string.
fn single_string(node: &KdlNode) -> Result<&str, ConfigError> {
	let key = node.name().value();
	let invalid = |reason: &str| ConfigError::InvalidValue {
		key: key.to_string(),
		reason: reason.to_string(),
	};

	match node.entries() {
		[entry] if entry.name().is_none() => entry.value().as_string().ok_or_else(|| invalid("expected a string")),
		[] => Err(invalid("expected one argument")),
		_ => Err(invalid("expected exactly one argument")),
	}
}

fn flag_list(node: &KdlNode) -> Result<Vec<String>, ConfigError> {
	node.entries()
		.iter()
		.map(|entry| {
			let flag = entry
				.value()
				.as_string()
				.filter(|_| entry.name().is_none())
				.ok_or_else(|| ConfigError::InvalidValue {
					key: "flags".to_string(),
					reason: format!("expected string arguments, got {entry}"),
				})?;
			if !flag.starts_with("--") {
				return Err(ConfigError::InvalidValue {
					key: "flags".to_string(),
					reason: format!("flag must start with '--': {flag:?}"),
				});
			}
			Ok(flag.to_string())
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn parses_every_setting() {
		let config = CompilerConfig::parse(
			r#"
			library "/opt/iree/lib/libIREECompiler.so"
			flags "--iree-hal-target-backends=vmvx" "--iree-input-type=none"
			flags "--mlir-print-debuginfo"
			diagnostics "console"
			"#,
		)
		.expect("config should parse");

		assert_eq!(
			config,
			CompilerConfig {
				library: Some(PathBuf::from("/opt/iree/lib/libIREECompiler.so")),
				flags: vec![
					"--iree-hal-target-backends=vmvx".to_string(),
					"--iree-input-type=none".to_string(),
					"--mlir-print-debuginfo".to_string(),
				],
				diagnostics: DiagnosticsMode::Console,
			}
		);
	}

	#[test]
	fn empty_document_is_default() {
		assert_eq!(CompilerConfig::parse("").expect("empty config should parse"), CompilerConfig::default());
		assert_eq!(CompilerConfig::default().diagnostics, DiagnosticsMode::Capture);
	}

	#[test]
	fn rejects_unknown_setting() {
		let err = CompilerConfig::parse("backend \"vmvx\"").expect_err("unknown node should fail");
		assert!(matches!(err, ConfigError::UnknownKey(ref key) if key == "backend"), "got: {err}");
	}

	#[test]
	fn rejects_bad_values() {
		for input in [
			"diagnostics \"loud\"",
			"diagnostics",
			"library 1",
			"library \"a\" \"b\"",
			"flags \"iree-input-type=none\"",
			"flags 3",
			"flags name=\"--iree-input-type=none\"",
		] {
			let err = CompilerConfig::parse(input).expect_err(input);
			assert!(matches!(err, ConfigError::InvalidValue { .. }), "{input}: {err}");
		}
	}

	#[test]
	fn rejects_invalid_kdl() {
		let err = CompilerConfig::parse("library \"unterminated").expect_err("broken KDL should fail");
		assert!(matches!(err, ConfigError::Kdl(_)), "got: {err}");
	}

	#[test]
	fn load_reports_missing_file() {
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let path = temp.path().join("ireec.kdl");
		let err = CompilerConfig::load(&path).expect_err("missing file should fail");
		assert!(matches!(err, ConfigError::Io { path: ref p, .. } if p == &path), "got: {err}");
	}

	#[test]
	fn load_reads_file() {
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let path = temp.path().join("ireec.kdl");
		std::fs::write(&path, "diagnostics \"off\"\n").expect("write should succeed");
		assert_eq!(CompilerConfig::load(&path).expect("config should load").diagnostics, DiagnosticsMode::Off);
	}

	#[test]
	fn library_override_replaces_configured_path() {
		let config = CompilerConfig {
			library: Some(PathBuf::from("/from/config.so")),
			..Default::default()
		};

		let kept = config.clone().with_library_override(None);
		assert_eq!(kept.library, Some(PathBuf::from("/from/config.so")));

		let ignored = config.clone().with_library_override(Some(PathBuf::new()));
		assert_eq!(ignored.library, Some(PathBuf::from("/from/config.so")));

		let overridden = config.with_library_override(Some(PathBuf::from("/from/env.so")));
		assert_eq!(overridden.library, Some(PathBuf::from("/from/env.so")));
	}
}
