//! Error types and the native error bridge.

use std::ffi::CStr;
use std::path::PathBuf;
use std::ptr::NonNull;

use thiserror::Error;

use crate::ffi::RawError;
use crate::native::NativeApi;

/// Errors raised by the binding layer.
#[derive(Debug, Error)]
pub enum Error {
	/// No library path was supplied, or nothing exists at it.
	#[error("compiler library not found: {0}")]
	LibraryNotFound(String),

	/// The dynamic loader rejected the library.
	#[error("failed to load compiler library {}: {source}", path.display())]
	LibraryLoad {
		/// Path handed to the loader.
		path: PathBuf,
		/// Loader error.
		source: libloading::Error,
	},

	/// The library does not export a required entry point.
	#[error("compiler library missing entry point {symbol}: {source}")]
	SymbolBinding {
		/// Name of the missing entry point.
		symbol: &'static str,
		/// Loader error.
		source: libloading::Error,
	},

	/// Failure reported by the compiler through a native error handle.
	#[error("{message}")]
	Compiler {
		/// Message copied out of the native error.
		message: String,
	},

	/// Input that cannot be handed to the native layer as is.
	#[error("invalid buffer: {0}")]
	InvalidBuffer(String),

	/// The object was already closed.
	#[error("{0} is closed")]
	Closed(&'static str),

	/// Global shutdown already ran for this process.
	#[error("compiler library has been shut down")]
	ShutDown,
}

/// Result type for binding-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	/// Returns the native message for [`Error::Compiler`].
	pub fn compiler_message(&self) -> Option<&str> {
		match self {
			Self::Compiler { message } => Some(message),
			_ => None,
		}
	}
}

/// Converts a native error handle into a [`Result`].
///
/// A null handle is success. Otherwise the message is copied out and the
/// handle is destroyed before returning, so no native error outlives the call.
pub(crate) fn check(api: &NativeApi, error: *mut RawError) -> Result<()> {
	let Some(error) = NonNull::new(error) else {
		return Ok(());
	};

	// SAFETY: `error` is a live handle returned by the library; the message
	// pointer is valid until the handle is destroyed below.
	let message = unsafe {
		let raw = (api.error_get_message)(error.as_ptr());
		if raw.is_null() {
			String::from("unknown compiler error")
		} else {
			CStr::from_ptr(raw).to_string_lossy().into_owned()
		}
	};
	// SAFETY: destroyed exactly once; the handle is not reachable afterwards.
	unsafe { (api.error_destroy)(error.as_ptr()) };

	tracing::debug!(%message, "Compiler reported error");
	Err(Error::Compiler { message })
}
