//! Process-wide global initialize/shutdown pairing.
//!
//! `ireeCompilerGlobalInitialize` runs the first time a [`GlobalInit`] is
//! acquired and never again. The process keeps one reference until exit; every
//! session and output holds another. `ireeCompilerGlobalShutdown` runs when the
//! last of them is released.

use std::sync::Arc;

use parking_lot::{Mutex, const_mutex};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::native::{self, NativeApi};

enum GlobalState {
	Uninitialized,
	Active(Arc<GlobalInit>),
	ShutDown,
}

static GLOBAL: Mutex<GlobalState> = const_mutex(GlobalState::Uninitialized);

/// Proof that the compiler library is globally initialized.
///
/// Cloned into every session and output; shutdown happens when the last clone
/// is dropped after the process reference was released at exit.
#[derive(Debug)]
pub struct GlobalInit {
	api: &'static NativeApi,
}

impl GlobalInit {
	/// Returns a reference to the global initialization, performing it on
	/// first use.
	///
	/// # Errors
	///
	/// Fails when the library cannot be bound, or with [`Error::ShutDown`]
	/// once the process has released its reference.
	pub fn acquire() -> Result<Arc<Self>> {
		let mut state = GLOBAL.lock();
		match &*state {
			GlobalState::Active(global) => Ok(Arc::clone(global)),
			GlobalState::ShutDown => Err(Error::ShutDown),
			GlobalState::Uninitialized => {
				let api = native::ensure_loaded()?;
				// SAFETY: serialized by `GLOBAL`; runs once per process.
				unsafe { (api.global_initialize)() };
				info!(origin = ?api.origin(), "Compiler globally initialized");

				// SAFETY: `release_at_exit` is a plain `extern "C" fn()` without
				// captured state.
				if unsafe { libc::atexit(release_at_exit) } != 0 {
					warn!("Could not register compiler shutdown at exit; shutdown will be skipped");
				}

				let global = Arc::new(Self { api });
				*state = GlobalState::Active(Arc::clone(&global));
				Ok(global)
			}
		}
	}

	/// Returns the bound native table.
	pub fn api(&self) -> &'static NativeApi {
		self.api
	}
}

impl Drop for GlobalInit {
	fn drop(&mut self) {
		// SAFETY: the last holder is gone; no session, invocation or output is
		// alive to observe the shutdown.
		unsafe { (self.api.global_shutdown)() };
		info!("Compiler globally shut down");
	}
}

/// Returns true while the process holds its global initialization reference.
pub fn is_initialized() -> bool {
	matches!(&*GLOBAL.lock(), GlobalState::Active(_))
}

extern "C" fn release_at_exit() {
	let released = std::mem::replace(&mut *GLOBAL.lock(), GlobalState::ShutDown);
	drop(released);
}
