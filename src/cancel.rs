//! Cooperative cancellation flag shared between a task and its owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CurioError, Result};

/// Cloning shares the same flag. Work checks it at safe points (loop
/// iterations, batch boundaries) and stops on its own; nothing is interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CurioError::Cancelled)
        } else {
            Ok(())
        }
    }
}
