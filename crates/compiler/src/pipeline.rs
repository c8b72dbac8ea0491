use std::fmt;

use ireec_dl::{Diagnostic, Invocation, Output, PipelineKind};
use tracing::debug;

use crate::error::{Error, Result};

/// A loaded source on its way to compiled output.
///
/// Wraps exactly one [`Invocation`]; soft parse and pipeline failures are
/// escalated to [`Error::Parse`] and [`Error::Pipeline`].
pub struct Pipeline<'c> {
	invocation: Invocation<'c>,
	name: String,
	capturing: bool,
}

impl<'c> Pipeline<'c> {
	pub(crate) fn new(invocation: Invocation<'c>, name: String, capturing: bool) -> Self {
		Self { invocation, name, capturing }
	}

	/// Runs `kind` over the loaded module.
	pub fn execute(&mut self, kind: PipelineKind) -> Result<()> {
		if self.invocation.execute(kind)? {
			return Ok(());
		}
		debug!(source = %self.name, pipeline = %kind, "Pipeline failed");
		Err(Error::Pipeline {
			kind,
			diagnostics: self.invocation.take_diagnostics(),
		})
	}

	/// Writes the current module as textual IR.
	pub fn output_ir(&self, output: &mut Output) -> Result<()> {
		Ok(self.invocation.output_ir(output)?)
	}

	/// Writes the compiled VM bytecode module.
	pub fn output_vm_bytecode(&self, output: &mut Output) -> Result<()> {
		Ok(self.invocation.output_vm_bytecode(output)?)
	}

	/// Buffer name or file path the pipeline was loaded from.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns true when diagnostics are collected rather than printed.
	pub fn is_capturing(&self) -> bool {
		self.capturing
	}

	/// Diagnostics captured so far that no error has claimed.
	pub fn diagnostics(&self) -> Vec<Diagnostic> {
		self.invocation.diagnostics()
	}

	/// Releases the invocation and its source. Further calls are no-ops.
	pub fn close(&mut self) {
		self.invocation.close();
	}

	pub fn is_closed(&self) -> bool {
		self.invocation.is_closed()
	}
}

impl Drop for Pipeline<'_> {
	fn drop(&mut self) {
		self.close();
	}
}

impl fmt::Debug for Pipeline<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Pipeline")
			.field("name", &self.name)
			.field("invocation", &self.invocation)
			.finish()
	}
}
