//! In-process stand-in for the compiler library.
//!
//! [`install`] binds a table whose entry points are implemented in Rust, so the
//! binding layer can be exercised without the real shared library. The
//! stand-in follows the native contracts the wrappers depend on:
//!
//! * flags are per session, reported as `--name=value` in registration order,
//!   and a batch is applied in order up to the first rejected flag
//! * buffer sources are read in place through the pointer they were wrapped
//!   with
//! * file outputs are deleted on destroy unless kept
//! * `module {}` parses, and prints back as `module {\n}`
//!
//! Handles are never freed, only stamped with their place in a process-wide
//! destroy sequence, so tests can observe destruction order and double
//! destroys without touching freed memory.

mod entry_points;

use std::sync::atomic::Ordering;

use crate::ffi::{RawError, RawSource};
use crate::native::{self, NativeApi};

pub use entry_points::FLAG_DEFAULTS;
use entry_points::{DOUBLE_DESTROYS, GLOBAL_INITIALIZE_CALLS, GLOBAL_SHUTDOWN_CALLS, HandleState, handle};

/// Binds the stand-in as the process-wide table and returns it.
///
/// Has no effect when a table is already bound.
pub fn install() -> &'static NativeApi {
	native::install(|| entry_points::table().into())
}

/// Returns true once the native handle behind `raw` was destroyed.
///
/// `raw` must come from the stand-in.
pub fn is_destroyed<T>(raw: *mut T) -> bool {
	// SAFETY: stand-in handles are never freed.
	unsafe { handle(raw) }.is_destroyed()
}

/// Returns when the handle behind `raw` was first destroyed, as a position in
/// the process-wide destroy sequence. `None` while it is alive.
///
/// `raw` must come from the stand-in.
pub fn destroyed_at<T>(raw: *mut T) -> Option<usize> {
	// SAFETY: stand-in handles are never freed.
	Some(unsafe { handle(raw) }.destroyed_at()).filter(|position| *position != 0)
}

/// Number of destroy calls made on already destroyed handles, process-wide.
pub fn double_destroys() -> usize {
	DOUBLE_DESTROYS.load(Ordering::SeqCst)
}

/// Number of `ireeCompilerGlobalInitialize` calls, process-wide.
pub fn global_initialize_calls() -> usize {
	GLOBAL_INITIALIZE_CALLS.load(Ordering::SeqCst)
}

/// Number of `ireeCompilerGlobalShutdown` calls, process-wide.
pub fn global_shutdown_calls() -> usize {
	GLOBAL_SHUTDOWN_CALLS.load(Ordering::SeqCst)
}

/// Returns the buffer address a wrapped source reads from.
pub fn source_buffer_ptr(raw: *mut RawSource) -> Option<*const u8> {
	// SAFETY: stand-in handles are never freed.
	match &*unsafe { handle(raw) }.state() {
		HandleState::Source(source) => source.buffer_ptr(),
		_ => None,
	}
}

/// Returns the null-terminated flag a wrapped source was created with.
pub fn source_null_terminated(raw: *mut RawSource) -> Option<bool> {
	// SAFETY: stand-in handles are never freed.
	match &*unsafe { handle(raw) }.state() {
		HandleState::Source(source) => source.null_terminated(),
		_ => None,
	}
}

/// Creates a native error handle carrying `message`.
pub fn make_error(message: &str) -> *mut RawError {
	entry_points::new_error(message)
}
