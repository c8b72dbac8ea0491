//! Runs against the real compiler library named by `IREE_COMPILER_LIB`.
//!
//! Every test returns early when the variable is unset.

use std::path::PathBuf;

use ireec_compiler::{Compiler, CompilerConfig, Error, PipelineKind};
use pretty_assertions::assert_eq;

const MAIN_FUNC: &str = "module {func.func @main(%arg0: i32) -> (i32) {return %arg0 : i32}}";

fn require_library() -> Option<PathBuf> {
	let _ = tracing_subscriber::fmt::try_init();
	match std::env::var_os(ireec_dl::LIBRARY_ENV) {
		Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
		_ => {
			eprintln!("{} is not set; skipping", ireec_dl::LIBRARY_ENV);
			None
		}
	}
}

fn compiler() -> Option<Compiler> {
	require_library()?;
	let config = CompilerConfig::default().with_env();
	Some(Compiler::from_config(&config).expect("compiler should load from IREE_COMPILER_LIB"))
}

#[test]
fn library_binds_from_env() {
	let Some(path) = require_library() else { return };
	let api = ireec_dl::load_from(&path).expect("library should bind");
	assert_eq!(api.origin(), &ireec_dl::LibraryOrigin::Path(path));
}

#[test]
fn default_flags_include_input_type() {
	let Some(compiler) = compiler() else { return };
	let flags = compiler.get_flags(false).expect("flags should be readable");
	assert!(flags.iter().any(|f| f == "--iree-input-type=auto"));
}

#[test]
fn flags_are_scoped_to_their_compiler() {
	let (Some(mut first), Some(mut second)) = (compiler(), compiler()) else { return };
	assert!(first.get_flags(true).expect("flags should be readable").is_empty());

	first.set_flags(["--iree-input-type=tosa"]).expect("flag should be accepted");
	second.set_flags(["--iree-input-type=none"]).expect("flag should be accepted");

	assert!(first.get_flags(true).expect("flags should be readable").contains(&"--iree-input-type=tosa".to_string()));
	assert!(second.get_flags(true).expect("flags should be readable").contains(&"--iree-input-type=none".to_string()));
	assert!(!second.get_flags(true).expect("flags should be readable").contains(&"--iree-input-type=tosa".to_string()));
	assert!(!first.get_flags(true).expect("flags should be readable").contains(&"--iree-input-type=none".to_string()));
}

#[test]
fn unknown_flag_is_rejected() {
	let Some(mut compiler) = compiler() else { return };
	let err = compiler.set_flags(["--does-not-exist=1"]).expect_err("unknown flag should be rejected");
	assert!(matches!(err, Error::Dl(ireec_dl::Error::Compiler { .. })), "got: {err}");
}

#[test]
fn membuffer_round_trip() {
	let Some(compiler) = compiler() else { return };
	let mut output = compiler.open_output_membuffer().expect("membuffer should open");
	output.write(b"foobar").expect("write should succeed");
	assert_eq!(output.map_memory().expect("membuffer should map"), b"foobar");
}

#[test]
fn file_output_is_discarded_unless_kept() {
	let Some(compiler) = compiler() else { return };
	let temp = tempfile::tempdir().expect("temp dir should exist");

	let discarded = temp.path().join("discarded.bin");
	let mut output = compiler.open_output_file(&discarded).expect("file output should open");
	output.write(b"foobar").expect("write should succeed");
	assert!(discarded.exists());
	output.close();
	assert!(!discarded.exists());

	let kept = temp.path().join("kept.bin");
	let mut output = compiler.open_output_file(&kept).expect("file output should open");
	output.write(b"foobar").expect("write should succeed");
	output.keep().expect("output is open");
	output.close();
	assert_eq!(std::fs::read(&kept).expect("kept file should remain"), b"foobar");
}

#[test]
fn empty_module_prints_as_ir() {
	let Some(compiler) = compiler() else { return };
	let mut pipeline = compiler.load_buffer("module {}", "foobar").expect("buffer should load");
	pipeline.execute(PipelineKind::Standard).expect("pipeline should run");

	let mut output = compiler.open_output_membuffer().expect("membuffer should open");
	pipeline.output_ir(&mut output).expect("IR should be written");
	assert_eq!(output.map_memory().expect("membuffer should map"), b"module {\n}");
}

#[test]
fn vmvx_bytecode_is_not_empty() {
	let Some(mut compiler) = compiler() else { return };
	compiler.set_flags(["--iree-hal-target-backends=vmvx"]).expect("flag should be accepted");

	let mut pipeline = compiler.load_buffer(MAIN_FUNC, "foobar").expect("buffer should load");
	pipeline.execute(PipelineKind::Standard).expect("pipeline should run");

	let mut output = compiler.open_output_membuffer().expect("membuffer should open");
	pipeline.output_vm_bytecode(&mut output).expect("bytecode should be written");
	assert!(!output.map_memory().expect("membuffer should map").is_empty());
}

#[test]
fn load_file_and_close() {
	let Some(compiler) = compiler() else { return };
	let temp = tempfile::tempdir().expect("temp dir should exist");
	let path = temp.path().join("input.mlir");
	std::fs::write(&path, "module {}").expect("write should succeed");

	let mut pipeline = compiler.load_file(&path).expect("file should load");
	pipeline.close();
	pipeline.close();
}
