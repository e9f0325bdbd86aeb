//! Concurrent disk I/O primitives.
//!
//! ```text
//!  producers ──► SequentialWriter ──► one file, submission order, byte-capped
//!  producers ──► WriterPool ────────► many files, ≤1 writer per destination
//!  ParallelReader threads ──► bounded queue ──► consumer
//!  workers ──► MainThreadDispatcher ──► closures run on the owning thread
//! ```
//!
//! All blocking is cooperative: producers sleep-poll while a byte cap is
//! exceeded, and every background loop polls a [`StopSignal`].

pub mod dispatcher;
pub mod parallel_reader;
pub mod sequential_writer;
pub mod stop;
pub mod writer_pool;

pub use dispatcher::{DispatchBudget, DispatchHandle, MainThreadDispatcher};
pub use parallel_reader::{ParallelReader, ReadBatch};
pub use sequential_writer::{SequentialWriter, WriterStats};
pub use stop::StopSignal;
pub use writer_pool::WriterPool;

use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{OctreeError, Result};

/// Sleep between polls of a full queue or an exceeded byte cap.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Join every handle, including those after a panicked one.
pub(crate) fn join_all<T>(
  handles: impl IntoIterator<Item = JoinHandle<T>>,
  what: &str,
) -> Result<()> {
  let panicked = handles
    .into_iter()
    .map(JoinHandle::join)
    .filter(|joined| joined.is_err())
    .count();
  if panicked > 0 {
    return Err(OctreeError::Consistency(format!("{panicked} {what} thread(s) panicked")));
  }
  Ok(())
}

/// Join from a drop or shutdown path, where a panic can only be logged.
pub(crate) fn join_logged<T>(handle: JoinHandle<T>, what: &str) {
  if handle.join().is_err() {
    tracing::warn!(thread = what, "background thread panicked");
  }
}
