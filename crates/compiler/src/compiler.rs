use std::path::Path;

use bytes::Bytes;
use ireec_dl::{Invocation, Output, Session, Source};
use tracing::{debug, info, warn};

use crate::config::{CompilerConfig, DiagnosticsMode};
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

/// A compiler session with its own flags.
///
/// Each load starts a fresh [`Pipeline`]; flags set on the compiler apply to
/// every pipeline loaded afterwards. Pipelines borrow the compiler, so flags
/// cannot change underneath a running pipeline.
#[derive(Debug)]
pub struct Compiler {
	session: Session,
	diagnostics: DiagnosticsMode,
}

impl Compiler {
	/// Creates a compiler from the library named by `IREE_COMPILER_LIB`, or
	/// whichever library is already bound.
	pub fn new() -> Result<Self> {
		Ok(Self {
			session: Session::new()?,
			diagnostics: DiagnosticsMode::default(),
		})
	}

	/// Creates a compiler from `config`: loads the configured library, then
	/// applies the configured flags.
	pub fn from_config(config: &CompilerConfig) -> Result<Self> {
		if let Some(library) = &config.library {
			ireec_dl::load_from(library)?;
		}
		let mut compiler = Self::new()?;
		compiler.diagnostics = config.diagnostics;
		if !config.flags.is_empty() {
			compiler.set_flags(&config.flags)?;
		}
		info!(flags = config.flags.len(), diagnostics = ?config.diagnostics, "Compiler configured");
		Ok(compiler)
	}

	pub fn set_flags<I, S>(&mut self, flags: I) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Ok(self.session.set_flags(flags)?)
	}

	pub fn get_flags(&self, non_default_only: bool) -> Result<Vec<String>> {
		Ok(self.session.get_flags(non_default_only)?)
	}

	/// Loads and parses an in-memory source named `name`.
	pub fn load_buffer(&self, buffer: impl Into<Bytes>, name: &str) -> Result<Pipeline<'_>> {
		let source = Source::wrap_buffer(&self.session, buffer, name)?;
		self.start(source, name.to_string())
	}

	/// Loads and parses the source file at `path`.
	pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Pipeline<'_>> {
		let path = path.as_ref();
		let source = Source::open_file(&self.session, path)?;
		self.start(source, path.display().to_string())
	}

	pub fn open_output_file(&self, path: impl AsRef<Path>) -> Result<Output> {
		Ok(Output::open_file(path)?)
	}

	pub fn open_output_membuffer(&self) -> Result<Output> {
		Ok(Output::open_membuffer()?)
	}

	/// The underlying binding-layer session.
	pub fn session(&self) -> &Session {
		&self.session
	}

	pub fn diagnostics_mode(&self) -> DiagnosticsMode {
		self.diagnostics
	}

	fn start<'c>(&'c self, source: Source<'c>, name: String) -> Result<Pipeline<'c>> {
		let mut invocation = self.session.invocation()?;
		let capturing = self.enable_diagnostics(&mut invocation)?;

		if !invocation.parse_source(source)? {
			debug!(source = %name, "Source failed to parse");
			return Err(Error::Parse {
				name,
				diagnostics: invocation.take_diagnostics(),
			});
		}
		Ok(Pipeline::new(invocation, name, capturing))
	}

	/// Enables the configured sink. Returns whether diagnostics are captured.
	fn enable_diagnostics(&self, invocation: &mut Invocation<'_>) -> Result<bool> {
		match self.diagnostics {
			DiagnosticsMode::Off => Ok(false),
			DiagnosticsMode::Console => {
				invocation.enable_console_diagnostics()?;
				Ok(false)
			}
			DiagnosticsMode::Capture => {
				if invocation.capture_diagnostics()? {
					return Ok(true);
				}
				warn!("Compiler library cannot capture diagnostics; printing them instead");
				invocation.enable_console_diagnostics()?;
				Ok(false)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn compiler() -> Compiler {
		let _ = tracing_subscriber::fmt::try_init();
		ireec_dl::testing::install();
		Compiler::new().expect("compiler should be created")
	}

	#[test]
	fn flags_round_trip_through_the_session() {
		let mut compiler = compiler();
		assert!(compiler.get_flags(true).expect("flags should be readable").is_empty());
		compiler.set_flags(["--iree-input-type=tosa"]).expect("flag should be accepted");
		assert_eq!(compiler.get_flags(true).expect("flags should be readable"), vec!["--iree-input-type=tosa".to_string()]);
	}

	#[test]
	fn unknown_flag_surfaces_the_compiler_message() {
		let mut compiler = compiler();
		let err = compiler.set_flags(["--does-not-exist=1"]).expect_err("unknown flag should be rejected");
		match err {
			Error::Dl(inner) => assert!(inner.compiler_message().is_some_and(|m| m.contains("does-not-exist"))),
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn from_config_applies_flags_and_diagnostics() {
		ireec_dl::testing::install();
		let config = CompilerConfig::parse("flags \"--iree-hal-target-backends=vmvx\"\ndiagnostics \"console\"").expect("config should parse");

		let compiler = Compiler::from_config(&config).expect("compiler should be configured");
		assert_eq!(compiler.diagnostics_mode(), DiagnosticsMode::Console);
		assert_eq!(compiler.get_flags(true).expect("flags should be readable"), vec!["--iree-hal-target-backends=vmvx".to_string()]);
	}

	#[test]
	fn from_config_rejects_bad_flags() {
		ireec_dl::testing::install();
		let config = CompilerConfig {
			flags: vec!["--does-not-exist=1".to_string()],
			..Default::default()
		};
		assert!(matches!(Compiler::from_config(&config), Err(Error::Dl(_))));
	}

	#[test]
	fn parse_failure_carries_diagnostics() {
		let compiler = compiler();
		let err = compiler.load_buffer("not a module", "broken.mlir").expect_err("parse should fail");
		match &err {
			Error::Parse { name, diagnostics } => {
				assert_eq!(name, "broken.mlir");
				assert!(!diagnostics.is_empty());
			}
			other => panic!("unexpected error: {other}"),
		}
		assert!(err.to_string().starts_with("error parsing source broken.mlir:"), "got: {err}");
	}

	#[test]
	fn parse_failure_without_capture_has_no_diagnostics() {
		ireec_dl::testing::install();
		let config = CompilerConfig {
			diagnostics: DiagnosticsMode::Off,
			..Default::default()
		};
		let compiler = Compiler::from_config(&config).expect("compiler should be configured");
		let err = compiler.load_buffer("not a module", "quiet.mlir").expect_err("parse should fail");
		assert!(err.diagnostics().is_empty());
		assert_eq!(err.to_string(), "error parsing source quiet.mlir (see diagnostics)");
	}

	#[test]
	fn load_file_names_the_pipeline_after_the_path() {
		let compiler = compiler();
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let path = temp.path().join("input.mlir");
		std::fs::write(&path, "module {}").expect("write should succeed");

		let mut pipeline = compiler.load_file(&path).expect("file should load");
		assert_eq!(pipeline.name(), path.display().to_string());
		assert!(pipeline.is_capturing());
		pipeline.close();
	}

	#[test]
	fn load_missing_file_is_a_hard_error() {
		let compiler = compiler();
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let err = compiler.load_file(temp.path().join("missing.mlir")).expect_err("missing file should fail");
		assert!(matches!(err, Error::Dl(ireec_dl::Error::Compiler { .. })), "got: {err}");
	}
}
