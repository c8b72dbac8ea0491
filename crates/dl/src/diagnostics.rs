//! Compiler diagnostics captured through the callback channel.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;

use parking_lot::Mutex;

/// Severity reported with a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
	Note,
	Warning,
	Error,
	Remark,
}

impl Severity {
	fn from_raw(raw: c_int) -> Self {
		match raw {
			0 => Self::Note,
			1 => Self::Warning,
			2 => Self::Error,
			_ => Self::Remark,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Note => "note",
			Self::Warning => "warning",
			Self::Error => "error",
			Self::Remark => "remark",
		}
	}
}

/// One diagnostic emitted during parsing or pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
	pub severity: Severity,
	pub message: String,
}

impl fmt::Display for Diagnostic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.severity.as_str(), self.message)
	}
}

/// Buffer the native layer appends to through [`collect_diagnostic`].
///
/// Its address is the callback's user data, so it must stay put until the
/// invocation that references it is destroyed.
#[derive(Debug, Default)]
pub(crate) struct DiagnosticSink {
	collected: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticSink {
	pub(crate) fn snapshot(&self) -> Vec<Diagnostic> {
		self.collected.lock().clone()
	}

	pub(crate) fn take(&self) -> Vec<Diagnostic> {
		std::mem::take(&mut *self.collected.lock())
	}
}

/// # Safety
///
/// `user_data` must point at a live [`DiagnosticSink`] and `message` must be
/// valid for `length` bytes.
pub(crate) unsafe extern "C" fn collect_diagnostic(severity: c_int, message: *const c_char, length: usize, user_data: *mut c_void) {
	if user_data.is_null() {
		return;
	}
	let sink = unsafe { &*(user_data as *const DiagnosticSink) };
	let message = if message.is_null() {
		String::new()
	} else {
		let bytes = unsafe { std::slice::from_raw_parts(message as *const u8, length) };
		String::from_utf8_lossy(bytes).into_owned()
	};
	sink.collected.lock().push(Diagnostic {
		severity: Severity::from_raw(severity),
		message,
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn callback_appends_in_delivery_order() {
		let sink = Box::new(DiagnosticSink::default());
		let user_data = &*sink as *const DiagnosticSink as *mut c_void;

		for (severity, text) in [(2, "expected 'module'"), (1, "unused value"), (7, "odd")] {
			unsafe { collect_diagnostic(severity, text.as_ptr() as *const c_char, text.len(), user_data) };
		}

		let collected = sink.take();
		assert_eq!(collected.len(), 3);
		assert_eq!(collected[0].to_string(), "error: expected 'module'");
		assert_eq!(collected[1].severity, Severity::Warning);
		assert_eq!(collected[2].severity, Severity::Remark);
		assert!(sink.snapshot().is_empty());
	}
}
