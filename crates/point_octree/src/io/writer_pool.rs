//! Multi-destination writer pool.
//!
//! Producers append bytes to a per-destination buffer. Worker threads claim
//! an unlocked destination, flush its whole pending buffer to that
//! destination's file, then release it - at most one thread writes a given
//! destination at a time while different destinations are written in
//! parallel. No ordering is guaranteed across destinations.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::{join_all, join_logged, StopSignal, POLL_INTERVAL};
use crate::error::{IoContext, OctreeError, Result};

#[derive(Default)]
struct Destination {
  pending: Vec<u8>,
  locked: bool,
  /// Bytes flushed to the file so far.
  flushed: u64,
}

struct PoolShared {
  dir: PathBuf,
  destinations: Mutex<HashMap<String, Destination>>,
  queued_bytes: AtomicU64,
  written_bytes: AtomicU64,
  closing: AtomicBool,
  error: Mutex<Option<OctreeError>>,
}

impl PoolShared {
  /// Claim one unlocked destination with pending bytes.
  fn claim(&self) -> Option<(String, Vec<u8>)> {
    let mut destinations = self.destinations.lock();
    destinations
      .iter_mut()
      .find(|(_, d)| !d.locked && !d.pending.is_empty())
      .map(|(name, d)| {
        d.locked = true;
        (name.clone(), std::mem::take(&mut d.pending))
      })
  }

  fn release(&self, name: &str, flushed: u64) {
    let mut destinations = self.destinations.lock();
    if let Some(d) = destinations.get_mut(name) {
      d.locked = false;
      d.flushed += flushed;
    }
  }

  fn has_pending(&self) -> bool {
    self
      .destinations
      .lock()
      .values()
      .any(|d| d.locked || !d.pending.is_empty())
  }

  fn flush(&self, name: &str, bytes: &[u8]) -> Result<()> {
    let path = self.dir.join(name);
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .at_path(&path)?;
    file.write_all(bytes).at_path(&path)
  }

  fn worker_loop(&self) {
    loop {
      match self.claim() {
        Some((name, bytes)) => {
          let len = bytes.len() as u64;
          let failed = self.error.lock().is_some();
          if !failed {
            match self.flush(&name, &bytes) {
              Ok(()) => {
                self.written_bytes.fetch_add(len, Ordering::AcqRel);
              }
              Err(e) => {
                tracing::error!(destination = %name, error = %e, "chunk flush failed");
                let mut slot = self.error.lock();
                if slot.is_none() {
                  *slot = Some(e);
                }
              }
            }
          }
          self.release(&name, if failed { 0 } else { len });
          self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
        }
        None => {
          if self.closing.load(Ordering::Acquire) && !self.has_pending() {
            return;
          }
          std::thread::sleep(POLL_INTERVAL);
        }
      }
    }
  }
}

/// Pool of threads flushing per-destination buffers into files of one directory.
pub struct WriterPool {
  shared: Arc<PoolShared>,
  workers: Vec<JoinHandle<()>>,
  memory_cap: u64,
  stop: StopSignal,
}

impl WriterPool {
  /// Start `threads` workers writing into `dir` (which must exist).
  pub fn new(dir: impl AsRef<Path>, threads: usize, memory_cap: u64, stop: StopSignal) -> Result<Self> {
    let shared = Arc::new(PoolShared {
      dir: dir.as_ref().to_path_buf(),
      destinations: Mutex::new(HashMap::new()),
      queued_bytes: AtomicU64::new(0),
      written_bytes: AtomicU64::new(0),
      closing: AtomicBool::new(false),
      error: Mutex::new(None),
    });
    let mut workers = Vec::with_capacity(threads.max(1));
    for i in 0..threads.max(1) {
      let worker_shared = Arc::clone(&shared);
      let handle = std::thread::Builder::new()
        .name(format!("writer-pool-{i}"))
        .spawn(move || worker_shared.worker_loop())
        .at_path(&shared.dir)?;
      workers.push(handle);
    }
    Ok(Self {
      shared,
      workers,
      memory_cap,
      stop,
    })
  }

  /// Queue `bytes` for the end of destination `name`.
  ///
  /// Blocks while the pool holds more than its memory cap.
  pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
    let len = bytes.len() as u64;
    loop {
      self.check_error()?;
      let queued = self.shared.queued_bytes.load(Ordering::Acquire);
      if queued == 0 || queued + len <= self.memory_cap {
        break;
      }
      if self.stop.is_stopped() {
        return Err(OctreeError::Cancelled);
      }
      std::thread::sleep(POLL_INTERVAL);
    }
    self.shared.queued_bytes.fetch_add(len, Ordering::AcqRel);
    let mut destinations = self.shared.destinations.lock();
    destinations
      .entry(name.to_string())
      .or_default()
      .pending
      .extend_from_slice(bytes);
    Ok(())
  }

  /// Bytes flushed to disk so far.
  pub fn total_bytes_written(&self) -> u64 {
    self.shared.written_bytes.load(Ordering::Acquire)
  }

  /// Bytes queued but not yet flushed.
  pub fn queued_bytes(&self) -> u64 {
    self.shared.queued_bytes.load(Ordering::Acquire)
  }

  fn check_error(&self) -> Result<()> {
    match self.shared.error.lock().as_ref() {
      Some(e) => Err(OctreeError::Consistency(format!("writer pool failed earlier: {e}"))),
      None => Ok(()),
    }
  }

  /// Flush everything, join the workers, and verify every destination file
  /// holds exactly the bytes flushed to it.
  ///
  /// Returns the total bytes written.
  pub fn finish(mut self) -> Result<u64> {
    self.shared.closing.store(true, Ordering::Release);
    join_all(self.workers.drain(..), "writer pool")?;
    if let Some(e) = self.shared.error.lock().take() {
      return Err(e);
    }
    let destinations = self.shared.destinations.lock();
    for (name, d) in destinations.iter() {
      let path = self.shared.dir.join(name);
      let on_disk = std::fs::metadata(&path).at_path(&path)?.len();
      if on_disk != d.flushed {
        return Err(OctreeError::Consistency(format!(
          "{}: {on_disk} bytes on disk, {} flushed",
          path.display(),
          d.flushed
        )));
      }
    }
    Ok(self.total_bytes_written())
  }
}

impl Drop for WriterPool {
  fn drop(&mut self) {
    self.shared.closing.store(true, Ordering::Release);
    for handle in self.workers.drain(..) {
      join_logged(handle, "writer pool");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::ScratchDir;

  #[test]
  fn test_bytes_land_in_their_destination() {
    let dir = ScratchDir::new("pool_dest");
    let pool = WriterPool::new(dir.path(), 3, 1 << 20, StopSignal::new()).unwrap();
    for i in 0..100u8 {
      let name = format!("d{}.dat", i % 5);
      pool.write(&name, &[i % 5; 10]).unwrap();
    }
    let total = pool.finish().unwrap();
    assert_eq!(total, 1000);
    for d in 0..5u8 {
      let data = std::fs::read(dir.join(&format!("d{d}.dat"))).unwrap();
      assert_eq!(data.len(), 200);
      assert!(data.iter().all(|&b| b == d));
    }
  }

  /// Order within one destination follows submission order.
  #[test]
  fn test_order_within_destination() {
    let dir = ScratchDir::new("pool_order");
    let pool = WriterPool::new(dir.path(), 4, 64, StopSignal::new()).unwrap();
    for i in 0..=255u8 {
      pool.write("seq.dat", &[i]).unwrap();
    }
    pool.finish().unwrap();
    let data = std::fs::read(dir.join("seq.dat")).unwrap();
    assert_eq!(data, (0..=255u8).collect::<Vec<_>>());
  }

  #[test]
  fn test_memory_cap_bounds_queue() {
    let dir = ScratchDir::new("pool_cap");
    let pool = WriterPool::new(dir.path(), 2, 256, StopSignal::new()).unwrap();
    for i in 0..64u32 {
      pool.write(&format!("c{}.dat", i % 3), &[0u8; 100]).unwrap();
      assert!(pool.queued_bytes() <= 356);
    }
    assert_eq!(pool.finish().unwrap(), 6400);
  }

  #[test]
  fn test_missing_directory_surfaces_error() {
    let pool = WriterPool::new("/nonexistent/pool", 1, 1 << 20, StopSignal::new()).unwrap();
    pool.write("x.dat", &[1, 2, 3]).unwrap();
    assert!(pool.finish().is_err());
  }
}
