//! Cooperative cancellation and joinable background loads.
//!
//! Long table scans poll a [`CancelFlag`] between entries; there is no
//! preemption. Background object loads are plain OS threads wrapped in a
//! [`LoadTask`] so callers get an explicit join instead of polling a
//! detached thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{FormatError, FormatResult};
use crate::object::SharedObject;

/// A shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next poll point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Err([`FormatError::Cancelled`]) once cancellation was requested.
    pub fn check(&self) -> FormatResult<()> {
        if self.is_cancelled() {
            Err(FormatError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A joinable handle to a background object load.
pub struct LoadTask {
    handle: JoinHandle<FormatResult<SharedObject>>,
    cancel: CancelFlag,
}

impl LoadTask {
    pub(crate) fn new(handle: JoinHandle<FormatResult<SharedObject>>, cancel: CancelFlag) -> Self {
        Self { handle, cancel }
    }

    /// Request cancellation of the in-flight load.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the worker thread has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the load finishes and return its result.
    pub fn join(self) -> FormatResult<SharedObject> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(FormatError::Corrupt("load worker panicked".into())),
        }
    }
}
