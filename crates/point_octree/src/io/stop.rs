//! Cooperative cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{OctreeError, Result};

/// Shared boolean polled by background loops. Never forces termination.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request every loop holding a clone to wind down.
  pub fn stop(&self) {
    self.0.store(true, Ordering::Release);
  }

  #[inline]
  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }

  /// `Err(Cancelled)` once stopped; used at phase boundaries.
  #[inline]
  pub fn check(&self) -> Result<()> {
    if self.is_stopped() {
      Err(OctreeError::Cancelled)
    } else {
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clones_share_state() {
    let a = StopSignal::new();
    let b = a.clone();
    assert!(a.check().is_ok());
    b.stop();
    assert!(a.is_stopped());
    assert!(matches!(a.check(), Err(OctreeError::Cancelled)));
  }
}
