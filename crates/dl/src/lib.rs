//! Binding layer over the IREE compiler shared library.
//!
//! The library is opened at runtime with `libloading` and every `ireeCompiler*`
//! entry point is bound once per process. Each native handle is wrapped in an
//! owning type that destroys it exactly once, either on an explicit `close` or
//! on drop.
//!
//! # Architecture
//!
//! * [`native`]: Library loading and the typed binding table
//! * [`global`]: Process-wide global initialize/shutdown pairing
//! * [`error`]: Error enum and the native error bridge
//! * [`Session`]: Compiler context and its flags
//! * [`Source`]: File or in-memory compilation input
//! * [`Invocation`]: Parse, run a pipeline, emit
//! * [`Output`]: File or membuffer sink for results
//!
//! # Lifetimes
//!
//! Sources and invocations borrow their [`Session`], so the borrow checker
//! enforces that a session outlives everything created from it. A source handed
//! to [`Invocation::parse_source`] is owned by the invocation from then on and
//! closed with it.
//!
//! ```no_run
//! use ireec_dl::{Output, PipelineKind, Session, Source};
//!
//! # fn main() -> ireec_dl::Result<()> {
//! let session = Session::new()?;
//! let mut inv = session.invocation()?;
//! inv.enable_console_diagnostics()?;
//! let source = Source::wrap_buffer(&session, "module {}", "input.mlir")?;
//! assert!(inv.parse_source(source)?);
//! assert!(inv.execute(PipelineKind::Standard)?);
//!
//! let mut output = Output::open_membuffer()?;
//! inv.output_ir(&mut output)?;
//! println!("{}", String::from_utf8_lossy(output.map_memory()?));
//! # Ok(())
//! # }
//! ```

mod diagnostics;
pub mod error;
pub mod ffi;
pub mod global;
mod invocation;
pub mod native;
mod output;
mod session;
mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use diagnostics::{Diagnostic, Severity};
pub use error::{Error, Result};
pub use global::GlobalInit;
pub use invocation::{Invocation, PipelineKind};
pub use native::{LIBRARY_ENV, LibraryOrigin, NativeApi, ensure_loaded, load_from, loaded};
pub use output::{Output, OutputKind};
pub use session::Session;
pub use source::{Backing, Source};
