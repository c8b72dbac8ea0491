use std::ffi::c_void;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::debug;

use crate::error::{self, Error, Result};
use crate::ffi::{RawOutput, path_to_cstring};
use crate::global::GlobalInit;
use crate::native::NativeApi;

/// Where an [`Output`] writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputKind {
	File(PathBuf),
	Membuffer,
}

/// A write sink for compiler results.
///
/// A file output is deleted on close unless [`Output::keep`] was called. A
/// membuffer output keeps its contents until close; read them with
/// [`Output::map_memory`] before then.
pub struct Output {
	raw: Option<NonNull<RawOutput>>,
	kind: OutputKind,
	kept: bool,
	global: Arc<GlobalInit>,
}

// SAFETY: output handles are not tied to the creating thread; `&mut` is
// required for every mutation.
unsafe impl Send for Output {}

impl Output {
	/// Opens `path` for writing. The file is created immediately.
	pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let global = GlobalInit::acquire()?;
		let c_path = path_to_cstring(path)?;
		let mut raw = ptr::null_mut();
		// SAFETY: `c_path` outlives the call; `raw` is written on success.
		let err = unsafe { (global.api().output_open_file)(c_path.as_ptr(), &mut raw) };
		error::check(global.api(), err)?;
		Self::from_raw(raw, OutputKind::File(path.to_path_buf()), global)
	}

	/// Opens an in-memory output.
	pub fn open_membuffer() -> Result<Self> {
		let global = GlobalInit::acquire()?;
		let mut raw = ptr::null_mut();
		// SAFETY: `raw` is written on success.
		let err = unsafe { (global.api().output_open_membuffer)(&mut raw) };
		error::check(global.api(), err)?;
		Self::from_raw(raw, OutputKind::Membuffer, global)
	}

	fn from_raw(raw: *mut RawOutput, kind: OutputKind, global: Arc<GlobalInit>) -> Result<Self> {
		let raw = NonNull::new(raw).ok_or_else(|| Error::Compiler {
			message: "compiler returned no output".to_string(),
		})?;
		debug!(output = ?raw, ?kind, "Opened output");
		Ok(Self {
			raw: Some(raw),
			kind,
			kept: false,
			global,
		})
	}

	/// Appends `bytes` to the output.
	pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
		let raw = self.raw()?;
		// SAFETY: `bytes` is valid for the duration of the call.
		let err = unsafe { (self.api().output_write)(raw.as_ptr(), bytes.as_ptr() as *const c_void, bytes.len()) };
		error::check(self.api(), err)
	}

	/// Marks a file output as durable so close leaves the file in place.
	///
	/// Membuffer outputs have nothing to persist; this is a no-op for them.
	pub fn keep(&mut self) -> Result<&mut Self> {
		let raw = self.raw()?;
		if matches!(self.kind, OutputKind::File(_)) {
			// SAFETY: open output handle.
			unsafe { (self.api().output_keep)(raw.as_ptr()) };
			self.kept = true;
		}
		Ok(self)
	}

	pub fn is_kept(&self) -> bool {
		self.kept
	}

	pub fn kind(&self) -> &OutputKind {
		&self.kind
	}

	/// Returns a zero-copy view of everything written so far.
	///
	/// The view borrows the output, so it cannot outlive close. An output
	/// with nothing written maps to an empty slice.
	pub fn map_memory(&self) -> Result<&[u8]> {
		let raw = self.raw()?;
		let mut contents: *mut c_void = ptr::null_mut();
		let mut size: u64 = 0;
		// SAFETY: open output handle; both out-pointers are valid.
		let err = unsafe { (self.api().output_map_memory)(raw.as_ptr(), &mut contents, &mut size) };
		error::check(self.api(), err)?;

		if contents.is_null() || size == 0 {
			return Ok(&[]);
		}
		let len = usize::try_from(size).map_err(|_| Error::InvalidBuffer(format!("mapped output of {size} bytes exceeds the address space")))?;
		// SAFETY: the compiler guarantees the mapping stays valid until the
		// output is destroyed, which requires `&mut self`.
		Ok(unsafe { std::slice::from_raw_parts(contents as *const u8, len) })
	}

	/// Destroys the native output, deleting an unkept file. Further calls are
	/// no-ops.
	pub fn close(&mut self) {
		if let Some(raw) = self.raw.take() {
			debug!(output = ?raw, kind = ?self.kind, kept = self.kept, "Destroying output");
			// SAFETY: taken out of `self.raw`, so destroyed exactly once.
			unsafe { (self.api().output_destroy)(raw.as_ptr()) };
		}
	}

	pub fn is_closed(&self) -> bool {
		self.raw.is_none()
	}

	pub(crate) fn raw(&self) -> Result<NonNull<RawOutput>> {
		self.raw.ok_or(Error::Closed("output"))
	}

	fn api(&self) -> &'static NativeApi {
		self.global.api()
	}
}

impl Drop for Output {
	fn drop(&mut self) {
		self.close();
	}
}

impl io::Write for Output {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		Output::write(self, buf).map_err(io::Error::other)?;
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl fmt::Debug for Output {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Output")
			.field("raw", &self.raw)
			.field("kind", &self.kind)
			.field("kept", &self.kept)
			.finish_non_exhaustive()
	}
}
