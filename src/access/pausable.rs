//! Emergency stop flag

use crate::error::{ExchangeError, ExchangeResult};

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct PauseState {
    paused: AtomicBool,
}

impl PauseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Reject while paused
    pub fn when_not_paused(&self) -> ExchangeResult<()> {
        if self.is_paused() {
            return Err(ExchangeError::EnforcedPause);
        }
        Ok(())
    }

    pub fn pause(&self) -> ExchangeResult<()> {
        if self.paused.swap(true, Ordering::SeqCst) {
            return Err(ExchangeError::EnforcedPause);
        }
        Ok(())
    }

    pub fn unpause(&self) -> ExchangeResult<()> {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return Err(ExchangeError::ExpectedPause);
        }
        Ok(())
    }
}
