//! Native binding table.
//!
//! The compiler library is loaded at most once per process. Every entry point
//! is resolved up front with its C signature, so a library missing any required
//! symbol is rejected before a single session exists.

use std::fmt;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ffi::*;

/// Environment variable holding the resolved path of the compiler library.
pub const LIBRARY_ENV: &str = "IREE_COMPILER_LIB";

static NATIVE: OnceCell<NativeApi> = OnceCell::new();

/// Where the bound entry points came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryOrigin {
	/// A shared library loaded from disk.
	Path(PathBuf),
	/// Entry points compiled into the current binary.
	InProcess,
}

macro_rules! native_api {
	(
		required { $($field:ident: $ty:ty = $symbol:literal,)* }
		optional { $($opt_field:ident: $opt_ty:ty = $opt_symbol:literal,)* }
	) => {
		/// Typed entry points of the compiler library.
		///
		/// Owns the [`Library`] mapping, so the function pointers stay valid for
		/// as long as the table exists. The process-wide table is never dropped.
		pub struct NativeApi {
			origin: LibraryOrigin,
			_library: Option<Library>,
			$(pub(crate) $field: $ty,)*
			$(pub(crate) $opt_field: Option<$opt_ty>,)*
		}

		impl NativeApi {
			fn bind(library: Library, path: &Path) -> Result<Self> {
				// SAFETY: every symbol is bound with the signature declared by the
				// compiler's C API header.
				unsafe {
					Ok(Self {
						$($field: bind_symbol::<$ty>(&library, $symbol)?,)*
						$($opt_field: bind_optional::<$opt_ty>(&library, $opt_symbol),)*
						origin: LibraryOrigin::Path(path.to_path_buf()),
						_library: Some(library),
					})
				}
			}

			/// Names of every entry point the table requires.
			pub const REQUIRED_SYMBOLS: &'static [&'static str] = &[$($symbol,)*];
		}

		/// Entry points for a table whose functions are compiled into this binary.
		#[cfg(any(test, feature = "testing"))]
		pub(crate) struct InProcessTable {
			$(pub $field: $ty,)*
			$(pub $opt_field: Option<$opt_ty>,)*
		}

		#[cfg(any(test, feature = "testing"))]
		impl From<InProcessTable> for NativeApi {
			fn from(table: InProcessTable) -> Self {
				Self {
					origin: LibraryOrigin::InProcess,
					_library: None,
					$($field: table.$field,)*
					$($opt_field: table.$opt_field,)*
				}
			}
		}
	};
}

native_api! {
	required {
		global_initialize: GlobalInitializeFn = "ireeCompilerGlobalInitialize",
		global_shutdown: GlobalShutdownFn = "ireeCompilerGlobalShutdown",
		error_destroy: ErrorDestroyFn = "ireeCompilerErrorDestroy",
		error_get_message: ErrorGetMessageFn = "ireeCompilerErrorGetMessage",
		session_create: SessionCreateFn = "ireeCompilerSessionCreate",
		session_destroy: SessionDestroyFn = "ireeCompilerSessionDestroy",
		session_get_flags: SessionGetFlagsFn = "ireeCompilerSessionGetFlags",
		session_set_flags: SessionSetFlagsFn = "ireeCompilerSessionSetFlags",
		source_open_file: SourceOpenFileFn = "ireeCompilerSourceOpenFile",
		source_wrap_buffer: SourceWrapBufferFn = "ireeCompilerSourceWrapBuffer",
		source_destroy: SourceDestroyFn = "ireeCompilerSourceDestroy",
		invocation_create: InvocationCreateFn = "ireeCompilerInvocationCreate",
		invocation_destroy: InvocationDestroyFn = "ireeCompilerInvocationDestroy",
		invocation_enable_console_diagnostics: InvocationEnableConsoleDiagnosticsFn = "ireeCompilerInvocationEnableConsoleDiagnostics",
		invocation_parse_source: InvocationParseSourceFn = "ireeCompilerInvocationParseSource",
		invocation_pipeline: InvocationPipelineFn = "ireeCompilerInvocationPipeline",
		invocation_output_ir: InvocationOutputFn = "ireeCompilerInvocationOutputIR",
		invocation_output_vm_bytecode: InvocationOutputFn = "ireeCompilerInvocationOutputVMBytecode",
		output_open_file: OutputOpenFileFn = "ireeCompilerOutputOpenFile",
		output_open_membuffer: OutputOpenMembufferFn = "ireeCompilerOutputOpenMembuffer",
		output_destroy: OutputDestroyFn = "ireeCompilerOutputDestroy",
		output_keep: OutputKeepFn = "ireeCompilerOutputKeep",
		output_write: OutputWriteFn = "ireeCompilerOutputWrite",
		output_map_memory: OutputMapMemoryFn = "ireeCompilerOutputMapMemory",
	}
	optional {
		invocation_enable_callback_diagnostics: InvocationEnableCallbackDiagnosticsFn = "ireeCompilerInvocationEnableCallbackDiagnostics",
	}
}

impl NativeApi {
	/// Loads the library at `path` and binds every entry point.
	fn open(path: &Path) -> Result<Self> {
		if !path.exists() {
			return Err(Error::LibraryNotFound(path.display().to_string()));
		}

		// SAFETY: loading runs the library's initializers. The compiler library
		// has no load-time side effects beyond registering its own statics.
		let library = unsafe { Library::new(path) }.map_err(|source| Error::LibraryLoad {
			path: path.to_path_buf(),
			source,
		})?;

		let api = Self::bind(library, path)?;
		info!(path = %path.display(), "Loaded compiler library");
		Ok(api)
	}

	/// Returns where this table's entry points came from.
	pub fn origin(&self) -> &LibraryOrigin {
		&self.origin
	}

	/// Returns true when callback diagnostics can be captured.
	pub fn supports_callback_diagnostics(&self) -> bool {
		self.invocation_enable_callback_diagnostics.is_some()
	}
}

impl fmt::Debug for NativeApi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NativeApi")
			.field("origin", &self.origin)
			.field("callback_diagnostics", &self.supports_callback_diagnostics())
			.finish_non_exhaustive()
	}
}

/// # Safety
///
/// `T` must match the C signature of `symbol`.
unsafe fn bind_symbol<T: Copy>(library: &Library, symbol: &'static str) -> Result<T> {
	let bound: Symbol<'_, T> = unsafe { library.get(symbol.as_bytes()) }.map_err(|source| Error::SymbolBinding { symbol, source })?;
	Ok(*bound)
}

/// # Safety
///
/// `T` must match the C signature of `symbol`.
unsafe fn bind_optional<T: Copy>(library: &Library, symbol: &'static str) -> Option<T> {
	match unsafe { library.get::<T>(symbol.as_bytes()) } {
		Ok(bound) => Some(*bound),
		Err(_) => {
			tracing::debug!(symbol, "Optional compiler entry point not exported");
			None
		}
	}
}

/// Returns the process-wide table, loading the library named by
/// [`LIBRARY_ENV`] on first use.
///
/// # Errors
///
/// Returns [`Error::LibraryNotFound`] when no path is configured or the file
/// does not exist, [`Error::LibraryLoad`] when the loader rejects it and
/// [`Error::SymbolBinding`] when a required entry point is missing.
pub fn ensure_loaded() -> Result<&'static NativeApi> {
	NATIVE.get_or_try_init(|| {
		let path = std::env::var_os(LIBRARY_ENV)
			.map(PathBuf::from)
			.ok_or_else(|| Error::LibraryNotFound(format!("{LIBRARY_ENV} is not set")))?;
		NativeApi::open(&path)
	})
}

/// Returns the process-wide table, loading it from `path` on first use.
///
/// Once a library is bound, later calls are no-ops; naming a different path
/// does not rebind.
pub fn load_from(path: &Path) -> Result<&'static NativeApi> {
	let api = NATIVE.get_or_try_init(|| NativeApi::open(path))?;
	if let LibraryOrigin::Path(bound) = api.origin()
		&& bound != path
	{
		warn!(requested = %path.display(), bound = %bound.display(), "Compiler library already loaded from a different path");
	}
	Ok(api)
}

/// Returns the process-wide table if it has been bound.
pub fn loaded() -> Option<&'static NativeApi> {
	NATIVE.get()
}

/// Binds `api` as the process-wide table unless one is already bound.
#[cfg(any(test, feature = "testing"))]
pub(crate) fn install(api: impl FnOnce() -> NativeApi) -> &'static NativeApi {
	NATIVE.get_or_init(api)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_library_is_not_found() {
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let err = NativeApi::open(&temp.path().join("libIREECompiler.so")).expect_err("missing file should not load");
		assert!(matches!(err, Error::LibraryNotFound(_)), "got: {err}");
	}

	#[test]
	fn non_library_file_fails_to_load() {
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let path = temp.path().join("libIREECompiler.so");
		std::fs::write(&path, b"not a shared object").expect("write should succeed");

		let err = NativeApi::open(&path).expect_err("garbage should not load");
		assert!(matches!(err, Error::LibraryLoad { .. }), "got: {err}");
	}

	#[test]
	fn required_symbols_cover_the_c_api() {
		assert_eq!(NativeApi::REQUIRED_SYMBOLS.len(), 24);
		assert!(NativeApi::REQUIRED_SYMBOLS.iter().all(|s| s.starts_with("ireeCompiler")));
		assert!(!NativeApi::REQUIRED_SYMBOLS.contains(&"ireeCompilerInvocationEnableCallbackDiagnostics"));
	}
}
