use std::ffi::{CString, c_char};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use bytes::Bytes;
use tracing::debug;

use crate::error::{self, Error, Result};
use crate::ffi::{RawSource, path_to_cstring};
use crate::session::Session;

/// What an open source reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
	/// A file opened and owned by the compiler.
	File(PathBuf),
	/// Memory the compiler reads in place, without copying.
	Buffer { name: String, bytes: Bytes },
}

enum State {
	/// The backing lives exactly as long as the native handle.
	Open { raw: NonNull<RawSource>, backing: Backing },
	Closed,
}

/// One compilation input bound to a [`Session`].
///
/// A memory-backed source keeps its [`Bytes`] for as long as it is open, since
/// the native source holds a raw pointer into them. `Bytes` is immutable, so the
/// memory can neither change nor be reclaimed underneath the compiler.
pub struct Source<'s> {
	state: State,
	session: &'s Session,
}

impl<'s> Source<'s> {
	/// Opens a file-backed source. The compiler reads and owns the file.
	pub fn open_file(session: &'s Session, path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let c_path = path_to_cstring(path)?;
		let mut raw = ptr::null_mut();
		// SAFETY: `c_path` outlives the call; `raw` is written on success.
		let err = unsafe { (session.api().source_open_file)(session.raw()?.as_ptr(), c_path.as_ptr(), &mut raw) };
		error::check(session.api(), err)?;

		let raw = NonNull::new(raw).ok_or_else(|| Error::Compiler {
			message: format!("compiler returned no source for {}", path.display()),
		})?;
		debug!(source = ?raw, path = %path.display(), "Opened file source");
		Ok(Self {
			state: State::Open {
				raw,
				backing: Backing::File(path.to_path_buf()),
			},
			session,
		})
	}

	/// Wraps an in-memory buffer as a source named `name`.
	///
	/// A trailing zero byte is reported to the compiler so it can treat the
	/// buffer as a C string.
	pub fn wrap_buffer(session: &'s Session, buffer: impl Into<Bytes>, name: &str) -> Result<Self> {
		let bytes: Bytes = buffer.into();
		let c_name = CString::new(name).map_err(|_| Error::InvalidBuffer(format!("buffer name contains a NUL byte: {name:?}")))?;
		let is_null_terminated = bytes.last() == Some(&0);

		let mut raw = ptr::null_mut();
		// SAFETY: on success the bytes are moved into `self.state` below and
		// stay there until the native source is destroyed.
		let err = unsafe {
			(session.api().source_wrap_buffer)(
				session.raw()?.as_ptr(),
				c_name.as_ptr(),
				bytes.as_ptr() as *const c_char,
				bytes.len(),
				is_null_terminated,
				&mut raw,
			)
		};
		error::check(session.api(), err)?;

		let raw = NonNull::new(raw).ok_or_else(|| Error::Compiler {
			message: format!("compiler returned no source for buffer {name}"),
		})?;
		debug!(source = ?raw, name, len = bytes.len(), is_null_terminated, "Wrapped buffer source");
		Ok(Self {
			state: State::Open {
				raw,
				backing: Backing::Buffer {
					name: name.to_string(),
					bytes,
				},
			},
			session,
		})
	}

	/// Destroys the native source, then releases the backing memory. Further
	/// calls are no-ops.
	pub fn close(&mut self) {
		if let State::Open { raw, backing } = std::mem::replace(&mut self.state, State::Closed) {
			debug!(source = ?raw, "Destroying source");
			// SAFETY: the state was replaced, so the handle is destroyed once.
			unsafe { (self.session.api().source_destroy)(raw.as_ptr()) };
			drop(backing);
		}
	}

	pub fn is_closed(&self) -> bool {
		matches!(self.state, State::Closed)
	}

	/// Returns what the source reads from, or `None` once closed.
	pub fn backing(&self) -> Option<&Backing> {
		match &self.state {
			State::Open { backing, .. } => Some(backing),
			State::Closed => None,
		}
	}

	pub(crate) fn raw(&self) -> Result<NonNull<RawSource>> {
		match &self.state {
			State::Open { raw, .. } => Ok(*raw),
			State::Closed => Err(Error::Closed("source")),
		}
	}
}

impl Drop for Source<'_> {
	fn drop(&mut self) {
		self.close();
	}
}

impl fmt::Debug for Source<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.state {
			State::Open {
				raw,
				backing: Backing::File(path),
			} => write!(f, "<Source {raw:p} file={}>", path.display()),
			State::Open {
				raw,
				backing: Backing::Buffer { name, bytes },
			} => write!(f, "<Source {raw:p} buffer={name} len={}>", bytes.len()),
			State::Closed => f.write_str("<Source closed>"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing;

	fn session() -> Session {
		testing::install();
		Session::new().expect("session should be created")
	}

	#[test]
	fn wrap_buffer_retains_bytes_until_close() {
		let session = session();
		let bytes = Bytes::from_static(b"module {}");
		let mut source = Source::wrap_buffer(&session, bytes.clone(), "foobar").expect("wrap should succeed");

		match source.backing() {
			Some(Backing::Buffer { name, bytes: held }) => {
				assert_eq!(name, "foobar");
				assert_eq!(held.as_ptr(), bytes.as_ptr());
			}
			other => panic!("unexpected backing: {other:?}"),
		}

		let raw = source.raw().expect("source is open");
		assert_eq!(testing::source_buffer_ptr(raw.as_ptr()), Some(bytes.as_ptr()));

		source.close();
		assert!(source.backing().is_none());
		assert!(testing::is_destroyed(raw.as_ptr()));
	}

	#[test]
	fn wrap_buffer_detects_null_terminator() {
		let session = session();
		let terminated = Source::wrap_buffer(&session, b"module {}\0".to_vec(), "nul").expect("wrap should succeed");
		let plain = Source::wrap_buffer(&session, b"module {}".to_vec(), "plain").expect("wrap should succeed");
		let empty = Source::wrap_buffer(&session, Vec::new(), "empty").expect("empty buffer should wrap");

		assert_eq!(testing::source_null_terminated(terminated.raw().expect("open").as_ptr()), Some(true));
		assert_eq!(testing::source_null_terminated(plain.raw().expect("open").as_ptr()), Some(false));
		assert_eq!(testing::source_null_terminated(empty.raw().expect("open").as_ptr()), Some(false));
	}

	#[test]
	fn wrap_buffer_rejects_nul_in_name() {
		let session = session();
		let err = Source::wrap_buffer(&session, b"module {}".to_vec(), "foo\0bar").expect_err("interior NUL should be rejected");
		assert!(matches!(err, Error::InvalidBuffer(_)), "got: {err}");
	}

	#[test]
	fn open_file_reports_missing_file() {
		let session = session();
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let err = Source::open_file(&session, temp.path().join("missing.mlir")).expect_err("missing file should fail");
		assert!(err.compiler_message().is_some_and(|m| m.contains("missing.mlir")), "got: {err}");
	}

	#[test]
	fn open_file_source_records_path() {
		let session = session();
		let temp = tempfile::tempdir().expect("temp dir should exist");
		let path = temp.path().join("input.mlir");
		std::fs::write(&path, "module {}").expect("write should succeed");

		let source = Source::open_file(&session, &path).expect("open should succeed");
		assert_eq!(source.backing(), Some(&Backing::File(path)));
		assert!(format!("{source:?}").contains("input.mlir"));
	}

	#[test]
	fn close_is_idempotent() {
		let session = session();
		let mut source = Source::wrap_buffer(&session, "module {}", "twice").expect("wrap should succeed");
		let raw = source.raw().expect("source is open");

		source.close();
		source.close();
		drop(source);

		assert!(testing::is_destroyed(raw.as_ptr()));
		assert_eq!(testing::double_destroys(), 0);
	}
}
