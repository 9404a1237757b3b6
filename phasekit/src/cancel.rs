//! Cooperative cancellation, checked between actions and between quality checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::error::TaskCancelled;

/// Shareable flag; clones observe the same state.
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

    /// `Err(TaskCancelled)` once the flag is tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(TaskCancelled.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        flag.check().expect("not cancelled");
        other.cancel();
        let err = flag.check().expect_err("cancelled");
        assert!(err.downcast_ref::<TaskCancelled>().is_some());
    }
}
