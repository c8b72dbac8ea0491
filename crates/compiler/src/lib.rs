//! Compiler facade over the IREE compiler binding.
//!
//! [`Compiler`] owns a session; each load returns a [`Pipeline`] that runs a
//! pipeline and emits into caller-owned [`Output`]s:
//!
//! ```no_run
//! use ireec_compiler::{Compiler, PipelineKind};
//!
//! # fn main() -> ireec_compiler::Result<()> {
//! let mut compiler = Compiler::new()?;
//! compiler.set_flags(["--iree-hal-target-backends=vmvx"])?;
//!
//! let mut pipeline = compiler.load_buffer("module {}", "input.mlir")?;
//! pipeline.execute(PipelineKind::Standard)?;
//!
//! let mut output = compiler.open_output_file("input.vmfb")?;
//! pipeline.output_vm_bytecode(&mut output)?;
//! output.keep()?;
//! # Ok(())
//! # }
//! ```
//!
//! Parse and pipeline failures become [`Error::Parse`] and [`Error::Pipeline`],
//! carrying the diagnostics captured while they ran.

mod compiler;
pub mod config;
pub mod error;
mod pipeline;

pub use compiler::Compiler;
pub use config::{CompilerConfig, DiagnosticsMode};
pub use error::{ConfigError, Error, Result};
pub use ireec_dl::{Diagnostic, Output, OutputKind, PipelineKind, Severity};
pub use pipeline::Pipeline;
