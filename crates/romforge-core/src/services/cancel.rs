use crate::error::{Result, RomError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a caller and an engine.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(RomError::Canceled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(RomError::Canceled)
        } else {
            Ok(())
        }
    }
}
