//! Raw C ABI of the compiler library.
//!
//! Handle types are opaque and only ever used behind pointers. The function
//! pointer aliases mirror the `ireeCompiler*` entry points one to one.

use std::ffi::{c_char, c_int, c_void};

macro_rules! opaque_handle {
	($($(#[$meta:meta])* $name:ident;)*) => {
		$(
			$(#[$meta])*
			#[repr(C)]
			pub struct $name {
				_private: [u8; 0],
				_marker: std::marker::PhantomData<(*mut u8, std::marker::PhantomPinned)>,
			}
		)*
	};
}

opaque_handle! {
	/// `iree_compiler_error_t`
	RawError;
	/// `iree_compiler_session_t`
	RawSession;
	/// `iree_compiler_source_t`
	RawSource;
	/// `iree_compiler_invocation_t`
	RawInvocation;
	/// `iree_compiler_output_t`
	RawOutput;
}

/// Receives one flag string per call during `ireeCompilerSessionGetFlags`.
pub type FlagCallback = unsafe extern "C" fn(flag: *const c_char, length: usize, user_data: *mut c_void);

/// Receives one diagnostic per call once callback diagnostics are enabled.
pub type DiagnosticCallback = unsafe extern "C" fn(severity: c_int, message: *const c_char, length: usize, user_data: *mut c_void);

pub type GlobalInitializeFn = unsafe extern "C" fn();
pub type GlobalShutdownFn = unsafe extern "C" fn();

pub type ErrorDestroyFn = unsafe extern "C" fn(error: *mut RawError);
pub type ErrorGetMessageFn = unsafe extern "C" fn(error: *mut RawError) -> *const c_char;

pub type SessionCreateFn = unsafe extern "C" fn() -> *mut RawSession;
pub type SessionDestroyFn = unsafe extern "C" fn(session: *mut RawSession);
pub type SessionGetFlagsFn = unsafe extern "C" fn(session: *mut RawSession, non_default_only: bool, callback: FlagCallback, user_data: *mut c_void);
pub type SessionSetFlagsFn = unsafe extern "C" fn(session: *mut RawSession, argc: c_int, argv: *const *const c_char) -> *mut RawError;

pub type SourceOpenFileFn = unsafe extern "C" fn(session: *mut RawSession, file_path: *const c_char, out_source: *mut *mut RawSource) -> *mut RawError;
pub type SourceWrapBufferFn = unsafe extern "C" fn(
	session: *mut RawSession,
	buffer_name: *const c_char,
	buffer: *const c_char,
	length: usize,
	is_null_terminated: bool,
	out_source: *mut *mut RawSource,
) -> *mut RawError;
pub type SourceDestroyFn = unsafe extern "C" fn(source: *mut RawSource);

pub type InvocationCreateFn = unsafe extern "C" fn(session: *mut RawSession) -> *mut RawInvocation;
pub type InvocationDestroyFn = unsafe extern "C" fn(invocation: *mut RawInvocation);
pub type InvocationEnableConsoleDiagnosticsFn = unsafe extern "C" fn(invocation: *mut RawInvocation);
pub type InvocationEnableCallbackDiagnosticsFn =
	unsafe extern "C" fn(invocation: *mut RawInvocation, flags: c_int, callback: DiagnosticCallback, user_data: *mut c_void);
pub type InvocationParseSourceFn = unsafe extern "C" fn(invocation: *mut RawInvocation, source: *mut RawSource) -> bool;
pub type InvocationPipelineFn = unsafe extern "C" fn(invocation: *mut RawInvocation, pipeline: c_int) -> bool;
pub type InvocationOutputFn = unsafe extern "C" fn(invocation: *mut RawInvocation, output: *mut RawOutput) -> *mut RawError;

pub type OutputOpenFileFn = unsafe extern "C" fn(file_path: *const c_char, out_output: *mut *mut RawOutput) -> *mut RawError;
pub type OutputOpenMembufferFn = unsafe extern "C" fn(out_output: *mut *mut RawOutput) -> *mut RawError;
pub type OutputDestroyFn = unsafe extern "C" fn(output: *mut RawOutput);
pub type OutputKeepFn = unsafe extern "C" fn(output: *mut RawOutput);
pub type OutputWriteFn = unsafe extern "C" fn(output: *mut RawOutput, data: *const c_void, length: usize) -> *mut RawError;
pub type OutputMapMemoryFn = unsafe extern "C" fn(output: *mut RawOutput, contents: *mut *mut c_void, size: *mut u64) -> *mut RawError;

/// Converts a filesystem path to the NUL-terminated form the C API expects.
pub(crate) fn path_to_cstring(path: &std::path::Path) -> crate::error::Result<std::ffi::CString> {
	#[cfg(unix)]
	let bytes = {
		use std::os::unix::ffi::OsStrExt;
		path.as_os_str().as_bytes().to_vec()
	};
	#[cfg(not(unix))]
	let bytes = path
		.to_str()
		.ok_or_else(|| crate::error::Error::InvalidBuffer(format!("path is not valid UTF-8: {}", path.display())))?
		.as_bytes()
		.to_vec();

	std::ffi::CString::new(bytes).map_err(|_| crate::error::Error::InvalidBuffer(format!("path contains a NUL byte: {}", path.display())))
}
