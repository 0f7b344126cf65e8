//! Cooperative cancellation of long-running scans.
//!
//! Batch operations check an [Interrupt] between index sets and between blocks and abort with
//! [Interrupted] once it has been triggered. Work completed before the check is not rolled back.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;

/// Returned by an operation that observed a triggered [Interrupt].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("interrupted")]
pub struct Interrupted;

/// A cloneable cancellation flag shared between a caller and in-flight operations.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that every operation observing this token stops.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fail with [Interrupted] if the token was triggered.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            return Err(Interrupted);
        }
        Ok(())
    }
}
