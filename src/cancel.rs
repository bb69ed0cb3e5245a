//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A flag that is set once and never cleared.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancel on SIGINT or SIGTERM (Ctrl-C on Windows).
    ///
    /// The handler only stores the flag. Can be installed once per process.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || flag.cancel())
            .map_err(|e| Error::context("installing interrupt handler", e))
    }
}
