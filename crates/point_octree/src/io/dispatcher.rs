//! Main-thread dispatcher.
//!
//! Worker threads post closures that must run on the thread owning the
//! rendering context. The owner drains them each frame within a budget;
//! posters either fire-and-forget or poll a handle until the closure ran.
//!
//! ```ignore
//! let dispatcher = Arc::new(MainThreadDispatcher::new(DispatchBudget::default()));
//!
//! // worker thread
//! let handle = dispatcher.post_with_handle(move || upload(buffers));
//!
//! // render thread, once per frame
//! dispatcher.run_pending();
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use web_time::Instant;

use super::{StopSignal, POLL_INTERVAL};
use crate::error::{OctreeError, Result};

type Job = Box<dyn FnOnce() + Send>;

/// Share of the owner thread one [`MainThreadDispatcher::run_pending`] call
/// may take.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatchBudget {
  /// No closure starts once this much time has passed in the call.
  pub time_slice: Duration,
  /// Closures run per call; `None` leaves only the time slice.
  pub max_jobs: Option<usize>,
}

impl DispatchBudget {
  pub const fn within(time_slice: Duration) -> Self {
    Self {
      time_slice,
      max_jobs: None,
    }
  }

  pub const fn with_max_jobs(mut self, max_jobs: usize) -> Self {
    self.max_jobs = Some(max_jobs);
    self
  }

  fn allows(&self, executed: usize, elapsed: Duration) -> bool {
    if self.max_jobs.is_some_and(|max| executed >= max) {
      return false;
    }
    // the first closure runs even when the slice is zero
    executed == 0 || elapsed < self.time_slice
  }
}

impl Default for DispatchBudget {
  /// Node buffer uploads get 2ms of each frame.
  fn default() -> Self {
    Self::within(Duration::from_millis(2))
  }
}

/// Statistics from one drain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStats {
  /// Closures executed.
  pub executed: usize,
  /// Closures still queued.
  pub pending: usize,
  /// Time spent in microseconds.
  pub elapsed_us: u64,
}

/// Poll-able completion slot for a posted closure.
pub struct DispatchHandle<T> {
  slot: Arc<Mutex<Option<T>>>,
}

impl<T> DispatchHandle<T> {
  /// Take the result if the closure has run.
  pub fn try_take(&self) -> Option<T> {
    self.slot.lock().take()
  }

  /// Poll until the closure has run or `stop` fires.
  ///
  /// Must not be called from the thread that drains the dispatcher.
  pub fn wait(self, stop: &StopSignal) -> Result<T> {
    loop {
      if let Some(value) = self.try_take() {
        return Ok(value);
      }
      if stop.is_stopped() {
        return Err(OctreeError::Cancelled);
      }
      std::thread::sleep(POLL_INTERVAL);
    }
  }
}

/// Queue of deferred actions executed by the owning thread.
pub struct MainThreadDispatcher {
  budget: DispatchBudget,
  queue: Mutex<VecDeque<Job>>,
}

impl MainThreadDispatcher {
  pub fn new(budget: DispatchBudget) -> Self {
    Self {
      budget,
      queue: Mutex::new(VecDeque::new()),
    }
  }

  /// Fire-and-forget.
  pub fn post(&self, job: impl FnOnce() + Send + 'static) {
    self.queue.lock().push_back(Box::new(job));
  }

  /// Post and get a handle to poll for the closure's result.
  pub fn post_with_handle<T, F>(&self, job: F) -> DispatchHandle<T>
  where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
  {
    let slot = Arc::new(Mutex::new(None));
    let out = Arc::clone(&slot);
    self.post(move || {
      let value = job();
      *out.lock() = Some(value);
    });
    DispatchHandle { slot }
  }

  /// Post and block (polling) until the owner ran the closure.
  pub fn post_and_wait<T, F>(&self, job: F, stop: &StopSignal) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
  {
    self.post_with_handle(job).wait(stop)
  }

  pub fn pending_count(&self) -> usize {
    self.queue.lock().len()
  }

  /// Execute queued closures within the budget. Call from the owning thread.
  pub fn run_pending(&self) -> DispatchStats {
    let start = Instant::now();
    let mut stats = DispatchStats::default();

    while self.budget.allows(stats.executed, start.elapsed()) {
      // pop under the lock, run outside it so jobs may post more jobs
      let Some(job) = self.queue.lock().pop_front() else {
        break;
      };
      job();
      stats.executed += 1;
    }

    stats.pending = self.pending_count();
    stats.elapsed_us = start.elapsed().as_micros() as u64;
    stats
  }
}

impl Default for MainThreadDispatcher {
  fn default() -> Self {
    Self::new(DispatchBudget::default())
  }
}
