//! Bounded sequential writer.
//!
//! A single background thread drains `(offset, bytes)` jobs against one open
//! file. Producers block while queued bytes exceed the memory cap; this is
//! the pipeline's backpressure during payload writing.
//!
//! # Usage
//!
//! ```ignore
//! let writer = SequentialWriter::create("out/octree.dat", 100 << 20, stop.clone())?;
//! let offset = writer.enqueue_append(bytes)?; // known before the write lands
//! node.file_offset = Some(offset);
//! let stats = writer.finish()?;
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{self as channel, Sender};
use parking_lot::Mutex;

use super::{join_logged, StopSignal, POLL_INTERVAL};
use crate::error::{IoContext, OctreeError, Result};

struct WriteJob {
  offset: u64,
  bytes: Vec<u8>,
}

#[derive(Default)]
struct Shared {
  /// Bytes enqueued but not yet written.
  outstanding: AtomicU64,
  written: AtomicU64,
  writes: AtomicU64,
  error: Mutex<Option<io::Error>>,
}

/// Totals reported by [`SequentialWriter::finish`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
  /// Bytes written to the file.
  pub bytes_written: u64,
  /// Jobs applied.
  pub writes: u64,
  /// Length of the file after the last write.
  pub file_len: u64,
}

/// Single-file writer with a byte-capped job queue.
///
/// Writes are applied in enqueue order. Append offsets come from a
/// monotonically increasing counter, so callers learn where data will land
/// before the write completes.
pub struct SequentialWriter {
  path: PathBuf,
  sender: Option<Sender<WriteJob>>,
  handle: Option<JoinHandle<Option<File>>>,
  shared: Arc<Shared>,
  next_offset: AtomicU64,
  memory_cap: u64,
  stop: StopSignal,
}

impl SequentialWriter {
  /// Create (truncate) `path` and start the writer thread.
  pub fn create(path: impl AsRef<Path>, memory_cap: u64, stop: StopSignal) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(true)
      .open(&path)
      .at_path(&path)?;

    let (sender, receiver) = channel::unbounded::<WriteJob>();
    let shared = Arc::new(Shared::default());
    let thread_shared = Arc::clone(&shared);

    let handle = std::thread::Builder::new()
      .name("sequential-writer".into())
      .spawn(move || {
        let mut file = file;
        for job in receiver {
          let len = job.bytes.len() as u64;
          let failed = thread_shared.error.lock().is_some();
          if !failed {
            let result = file
              .seek(SeekFrom::Start(job.offset))
              .and_then(|_| file.write_all(&job.bytes));
            match result {
              Ok(()) => {
                thread_shared.written.fetch_add(len, Ordering::Relaxed);
                thread_shared.writes.fetch_add(1, Ordering::Relaxed);
              }
              Err(e) => {
                tracing::error!(offset = job.offset, error = %e, "sequential write failed");
                *thread_shared.error.lock() = Some(e);
              }
            }
          }
          // release queue memory even after a failure so producers never hang
          thread_shared.outstanding.fetch_sub(len, Ordering::AcqRel);
        }
        Some(file)
      })
      .at_path(&path)?;

    Ok(Self {
      path,
      sender: Some(sender),
      handle: Some(handle),
      shared,
      next_offset: AtomicU64::new(0),
      memory_cap,
      stop,
    })
  }

  /// File this writer targets.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Reserve `len` bytes at the end of the file, returning their offset.
  #[inline]
  pub fn reserve(&self, len: u64) -> u64 {
    self.next_offset.fetch_add(len, Ordering::AcqRel)
  }

  /// Bytes reserved so far (the final file length once all jobs land).
  #[inline]
  pub fn reserved_len(&self) -> u64 {
    self.next_offset.load(Ordering::Acquire)
  }

  /// Bytes enqueued but not yet on disk.
  #[inline]
  pub fn outstanding_bytes(&self) -> u64 {
    self.shared.outstanding.load(Ordering::Acquire)
  }

  /// Append `bytes`, returning the offset they will land at.
  pub fn enqueue_append(&self, bytes: Vec<u8>) -> Result<u64> {
    let offset = self.reserve(bytes.len() as u64);
    self.enqueue_at(offset, bytes)?;
    Ok(offset)
  }

  /// Write `bytes` at `offset`, which must lie inside a reserved range.
  pub fn enqueue_at(&self, offset: u64, bytes: Vec<u8>) -> Result<()> {
    let len = bytes.len() as u64;
    self.wait_for_capacity(len)?;
    self.shared.outstanding.fetch_add(len, Ordering::AcqRel);
    let sender = self
      .sender
      .as_ref()
      .ok_or_else(|| OctreeError::Consistency("writer already finished".into()))?;
    sender
      .send(WriteJob { offset, bytes })
      .map_err(|_| self.thread_error("writer thread exited"))
  }

  /// Spin-sleep until the job fits under the cap. A single job larger than
  /// the cap is admitted once the queue is empty.
  fn wait_for_capacity(&self, len: u64) -> Result<()> {
    loop {
      self.check_error()?;
      let outstanding = self.shared.outstanding.load(Ordering::Acquire);
      if outstanding == 0 || outstanding + len <= self.memory_cap {
        return Ok(());
      }
      if self.stop.is_stopped() {
        return Err(OctreeError::Cancelled);
      }
      std::thread::sleep(POLL_INTERVAL);
    }
  }

  fn check_error(&self) -> Result<()> {
    match self.shared.error.lock().as_ref() {
      Some(e) => Err(OctreeError::io(
        &self.path,
        io::Error::new(e.kind(), e.to_string()),
      )),
      None => Ok(()),
    }
  }

  fn thread_error(&self, msg: &str) -> OctreeError {
    OctreeError::io(&self.path, io::Error::new(io::ErrorKind::BrokenPipe, msg))
  }

  /// Drain the queue, join the thread, and report totals.
  pub fn finish(mut self) -> Result<WriterStats> {
    drop(self.sender.take());
    let file = match self.handle.take() {
      Some(handle) => handle
        .join()
        .map_err(|_| self.thread_error("writer thread panicked"))?,
      None => None,
    };
    self.check_error()?;
    let file_len = match file {
      Some(file) => {
        file.sync_data().at_path(&self.path)?;
        file.metadata().at_path(&self.path)?.len()
      }
      None => 0,
    };
    Ok(WriterStats {
      bytes_written: self.shared.written.load(Ordering::Acquire),
      writes: self.shared.writes.load(Ordering::Acquire),
      file_len,
    })
  }
}

impl Drop for SequentialWriter {
  fn drop(&mut self) {
    drop(self.sender.take());
    if let Some(handle) = self.handle.take() {
      join_logged(handle, "sequential writer");
    }
  }
}

#[cfg(test)]
#[path = "sequential_writer_test.rs"]
mod sequential_writer_test;
