use std::ffi::{CString, c_char, c_int, c_void};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::debug;

use crate::error::{self, Error, Result};
use crate::ffi::RawSession;
use crate::global::GlobalInit;
use crate::invocation::Invocation;
use crate::native::NativeApi;

/// A compiler context with its own set of flags.
///
/// Invocations and sources borrow the session, so it cannot be closed or
/// reconfigured while any of them is alive.
pub struct Session {
	raw: Option<NonNull<RawSession>>,
	global: Arc<GlobalInit>,
}

// SAFETY: a session handle is not tied to the thread that created it. Shared
// access is not allowed, so `Session` is not `Sync`.
unsafe impl Send for Session {}

impl Session {
	/// Creates a session, globally initializing the library on first use.
	pub fn new() -> Result<Self> {
		let global = GlobalInit::acquire()?;
		// SAFETY: the library is globally initialized for as long as `global`
		// lives, which outlives the session handle.
		let raw = unsafe { (global.api().session_create)() };
		let raw = NonNull::new(raw).ok_or_else(|| Error::Compiler {
			message: "failed to create compiler session".to_string(),
		})?;
		debug!(session = ?raw, "Created compiler session");
		Ok(Self { raw: Some(raw), global })
	}

	/// Returns the flags of this session in the order the compiler reports
	/// them.
	///
	/// With `non_default_only`, only flags changed from their defaults are
	/// returned.
	pub fn get_flags(&self, non_default_only: bool) -> Result<Vec<String>> {
		let raw = self.raw()?;
		let mut flags: Vec<String> = Vec::new();
		// SAFETY: `flags` outlives the call and the callback only runs during it.
		unsafe {
			(self.api().session_get_flags)(raw.as_ptr(), non_default_only, append_flag, &mut flags as *mut Vec<String> as *mut c_void);
		}
		Ok(flags)
	}

	/// Applies flags in `--name` or `--name=value` syntax.
	///
	/// The batch is handed to the compiler in one call. When a flag is
	/// rejected, flags earlier in the batch stay applied.
	pub fn set_flags<I, S>(&mut self, flags: I) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let raw = self.raw()?;
		let owned = flags
			.into_iter()
			.map(|flag| {
				let flag = flag.as_ref();
				CString::new(flag).map_err(|_| Error::InvalidBuffer(format!("flag contains a NUL byte: {flag:?}")))
			})
			.collect::<Result<Vec<_>>>()?;
		let argv: Vec<*const c_char> = owned.iter().map(|flag| flag.as_ptr()).collect();
		let argc = c_int::try_from(argv.len()).map_err(|_| Error::InvalidBuffer(format!("too many flags: {}", argv.len())))?;

		debug!(session = ?raw, count = argc, "Setting compiler flags");
		// SAFETY: `owned` keeps every argv entry alive across the call.
		let err = unsafe { (self.api().session_set_flags)(raw.as_ptr(), argc, argv.as_ptr()) };
		error::check(self.api(), err)
	}

	/// Starts a new invocation bound to this session.
	pub fn invocation(&self) -> Result<Invocation<'_>> {
		Invocation::new(self)
	}

	/// Destroys the native session. Further calls are no-ops.
	pub fn close(&mut self) {
		if let Some(raw) = self.raw.take() {
			debug!(session = ?raw, "Destroying compiler session");
			// SAFETY: taken out of `self.raw`, so destroyed exactly once.
			unsafe { (self.api().session_destroy)(raw.as_ptr()) };
		}
	}

	pub fn is_closed(&self) -> bool {
		self.raw.is_none()
	}

	pub(crate) fn raw(&self) -> Result<NonNull<RawSession>> {
		self.raw.ok_or(Error::Closed("session"))
	}

	pub(crate) fn api(&self) -> &'static NativeApi {
		self.global.api()
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.close();
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session").field("raw", &self.raw).finish_non_exhaustive()
	}
}

/// Appends one delivered flag to the `Vec<String>` behind `user_data`.
unsafe extern "C" fn append_flag(flag: *const c_char, length: usize, user_data: *mut c_void) {
	if flag.is_null() || user_data.is_null() {
		return;
	}
	// SAFETY: `user_data` is the `Vec` passed by `get_flags`; the flag bytes
	// are valid for the duration of the callback.
	let (flags, bytes) = unsafe { (&mut *(user_data as *mut Vec<String>), std::slice::from_raw_parts(flag as *const u8, length)) };
	flags.push(String::from_utf8_lossy(bytes).into_owned());
}
