use std::ffi::{c_int, c_void};
use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticSink, collect_diagnostic};
use crate::error::{self, Error, Result};
use crate::ffi::RawInvocation;
use crate::output::Output;
use crate::session::Session;
use crate::source::Source;

/// Which compilation pipeline [`Invocation::execute`] runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineKind {
	/// Full input-to-VM pipeline.
	#[default]
	Standard,
	/// Only the HAL executable pipeline.
	HalExecutable,
}

impl PipelineKind {
	pub const fn as_raw(self) -> c_int {
		match self {
			Self::Standard => 0,
			Self::HalExecutable => 1,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Standard => "standard",
			Self::HalExecutable => "hal-executable",
		}
	}
}

impl fmt::Display for PipelineKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single compilation attempt: parse one source, run a pipeline, emit.
///
/// Every source passed to [`Invocation::parse_source`] is owned by the
/// invocation and closed with it. Parse and pipeline failures are reported as
/// `false` without a message; diagnostics for them go to whichever sink was
/// enabled beforehand.
pub struct Invocation<'s> {
	raw: Option<NonNull<RawInvocation>>,
	sources: Vec<Source<'s>>,
	// Callback user data; must outlive `raw`.
	sink: Option<Box<DiagnosticSink>>,
	session: &'s Session,
}

impl<'s> Invocation<'s> {
	pub fn new(session: &'s Session) -> Result<Self> {
		// SAFETY: the session handle is open and outlives the invocation.
		let raw = unsafe { (session.api().invocation_create)(session.raw()?.as_ptr()) };
		let raw = NonNull::new(raw).ok_or_else(|| Error::Compiler {
			message: "failed to create compiler invocation".to_string(),
		})?;
		debug!(invocation = ?raw, "Created invocation");
		Ok(Self {
			raw: Some(raw),
			sources: Vec::new(),
			sink: None,
			session,
		})
	}

	/// Routes diagnostics to the compiler's console sink.
	pub fn enable_console_diagnostics(&mut self) -> Result<()> {
		let raw = self.raw()?;
		// SAFETY: open invocation handle.
		unsafe { (self.session.api().invocation_enable_console_diagnostics)(raw.as_ptr()) };
		Ok(())
	}

	/// Captures diagnostics into this invocation instead of the console.
	///
	/// Returns `false` when the loaded library does not export callback
	/// diagnostics; nothing is enabled in that case.
	pub fn capture_diagnostics(&mut self) -> Result<bool> {
		let raw = self.raw()?;
		if self.sink.is_some() {
			return Ok(true);
		}
		let Some(enable) = self.session.api().invocation_enable_callback_diagnostics else {
			return Ok(false);
		};

		let sink = Box::new(DiagnosticSink::default());
		let user_data = &*sink as *const DiagnosticSink as *mut c_void;
		// SAFETY: the boxed sink is stored in `self.sink` and dropped only after
		// the invocation handle is destroyed.
		unsafe { enable(raw.as_ptr(), 0, collect_diagnostic, user_data) };
		self.sink = Some(sink);
		Ok(true)
	}

	/// Returns the diagnostics captured so far, in delivery order.
	pub fn diagnostics(&self) -> Vec<Diagnostic> {
		self.sink.as_ref().map(|sink| sink.snapshot()).unwrap_or_default()
	}

	/// Drains the captured diagnostics.
	pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
		self.sink.as_ref().map(|sink| sink.take()).unwrap_or_default()
	}

	/// Attaches `source` and parses it. Returns `false` on a parse failure.
	///
	/// The source is owned by the invocation from here on, whatever the
	/// outcome.
	pub fn parse_source(&mut self, source: Source<'s>) -> Result<bool> {
		let raw = self.raw()?;
		let source_raw = source.raw()?;
		self.sources.push(source);
		// SAFETY: both handles are open; the source stays attached until the
		// invocation is destroyed.
		let parsed = unsafe { (self.session.api().invocation_parse_source)(raw.as_ptr(), source_raw.as_ptr()) };
		debug!(invocation = ?raw, source = ?source_raw, parsed, "Parsed source");
		Ok(parsed)
	}

	/// Runs `kind` over the parsed module in place. Returns `false` on failure.
	pub fn execute(&mut self, kind: PipelineKind) -> Result<bool> {
		let raw = self.raw()?;
		// SAFETY: open invocation handle.
		let succeeded = unsafe { (self.session.api().invocation_pipeline)(raw.as_ptr(), kind.as_raw()) };
		debug!(invocation = ?raw, pipeline = %kind, succeeded, "Ran pipeline");
		Ok(succeeded)
	}

	/// Writes the current module as textual IR into `output`.
	pub fn output_ir(&self, output: &mut Output) -> Result<()> {
		let raw = self.raw()?;
		// SAFETY: both handles are open for the duration of the call.
		let err = unsafe { (self.session.api().invocation_output_ir)(raw.as_ptr(), output.raw()?.as_ptr()) };
		error::check(self.session.api(), err)
	}

	/// Writes the compiled VM bytecode module into `output`.
	pub fn output_vm_bytecode(&self, output: &mut Output) -> Result<()> {
		let raw = self.raw()?;
		// SAFETY: both handles are open for the duration of the call.
		let err = unsafe { (self.session.api().invocation_output_vm_bytecode)(raw.as_ptr(), output.raw()?.as_ptr()) };
		error::check(self.session.api(), err)
	}

	/// Sources attached so far, in attach order.
	pub fn sources(&self) -> &[Source<'s>] {
		&self.sources
	}

	/// Destroys the native invocation, then closes every attached source.
	/// Further calls are no-ops.
	pub fn close(&mut self) {
		if let Some(raw) = self.raw.take() {
			debug!(invocation = ?raw, sources = self.sources.len(), "Destroying invocation");
			// SAFETY: taken out of `self.raw`, so destroyed exactly once.
			unsafe { (self.session.api().invocation_destroy)(raw.as_ptr()) };
			for source in &mut self.sources {
				source.close();
			}
			self.sources.clear();
		}
	}

	pub fn is_closed(&self) -> bool {
		self.raw.is_none()
	}

	fn raw(&self) -> Result<NonNull<RawInvocation>> {
		self.raw.ok_or(Error::Closed("invocation"))
	}
}

impl Drop for Invocation<'_> {
	fn drop(&mut self) {
		self.close();
	}
}

impl fmt::Debug for Invocation<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Invocation")
			.field("raw", &self.raw)
			.field("sources", &self.sources)
			.field("capturing", &self.sink.is_some())
			.finish()
	}
}
