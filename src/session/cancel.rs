use crate::foundation::error::{MaskfxError, MaskfxResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag checked by every pipeline stage.
///
/// Clones observe the same flag. Once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Return `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> MaskfxResult<()> {
        if self.is_cancelled() {
            Err(MaskfxError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/cancel.rs"]
mod tests;
