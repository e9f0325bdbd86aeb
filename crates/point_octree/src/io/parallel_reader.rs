//! Parallel chunked reader.
//!
//! Splits a file into one contiguous range per thread, aligned to the record
//! stride so no record straddles a boundary. Each thread streams fixed-size
//! batches into a shared bounded queue; a full queue parks the readers.
//!
//! ```text
//!  file: [ range 0 | range 1 | range 2 | range 3 ]
//!            │         │         │         │
//!            ▼         ▼         ▼         ▼
//!         ┌──────────────────────────────────────┐
//!         │ bounded queue (max_queued batches)   │──► consumer
//!         └──────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;

use super::StopSignal;
use crate::error::{IoContext, OctreeError, Result};

/// One batch of whole records.
#[derive(Debug)]
pub struct ReadBatch {
  /// Index of the thread that produced the batch.
  pub thread: usize,
  /// Byte offset of the batch in the file.
  pub offset: u64,
  /// Raw bytes, a whole number of records.
  pub bytes: Vec<u8>,
}

/// Streams a record file through a pool of reader threads.
#[derive(Clone, Debug)]
pub struct ParallelReader {
  path: PathBuf,
  stride: usize,
  threads: usize,
  batch_records: usize,
  max_queued: usize,
  header_len: u64,
}

impl ParallelReader {
  /// Reader over `path` with records of `stride` bytes.
  pub fn new(path: impl AsRef<Path>, stride: usize) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      stride: stride.max(1),
      threads: 4,
      batch_records: 1 << 16,
      max_queued: 8,
      header_len: 0,
    }
  }

  /// Number of reader threads.
  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  /// Records per batch.
  pub fn batch_records(mut self, records: usize) -> Self {
    self.batch_records = records.max(1);
    self
  }

  /// Batches allowed in the queue before readers park.
  pub fn max_queued(mut self, batches: usize) -> Self {
    self.max_queued = batches.max(1);
    self
  }

  /// Bytes to skip at the start of the file.
  pub fn header_len(mut self, bytes: u64) -> Self {
    self.header_len = bytes;
    self
  }

  /// Record count of the file.
  pub fn record_count(&self) -> Result<u64> {
    let len = std::fs::metadata(&self.path).at_path(&self.path)?.len();
    let body = len.saturating_sub(self.header_len);
    if body % self.stride as u64 != 0 {
      return Err(OctreeError::Format(format!(
        "{}: {body} bytes is not a multiple of the {}-byte stride",
        self.path.display(),
        self.stride
      )));
    }
    Ok(body / self.stride as u64)
  }

  /// Per-thread `(start, len)` byte ranges, stride-aligned.
  pub fn ranges(&self) -> Result<Vec<(u64, u64)>> {
    let records = self.record_count()?;
    let threads = self.threads as u64;
    let per_thread = records / threads;
    let remainder = records % threads;
    let stride = self.stride as u64;
    let mut ranges = Vec::with_capacity(self.threads);
    let mut start = self.header_len;
    for t in 0..threads {
      let count = per_thread + u64::from(t < remainder);
      if count > 0 {
        ranges.push((start, count * stride));
      }
      start += count * stride;
    }
    Ok(ranges)
  }

  /// Stream every batch to `consume` on the calling thread.
  ///
  /// Batch order across threads is unspecified. Returns the bytes consumed.
  /// A consumer error or the stop signal ends all reader threads.
  pub fn for_each_batch<F>(&self, stop: &StopSignal, mut consume: F) -> Result<u64>
  where
    F: FnMut(ReadBatch) -> Result<()>,
  {
    let ranges = self.ranges()?;
    let batch_bytes = (self.batch_records * self.stride) as u64;
    let (sender, receiver) = channel::bounded::<Result<ReadBatch>>(self.max_queued);

    std::thread::scope(|scope| {
      for (thread, (start, len)) in ranges.into_iter().enumerate() {
        let sender = sender.clone();
        let path = self.path.as_path();
        let stop = stop.clone();
        scope.spawn(move || {
          let result = read_range(path, start, len, batch_bytes, &stop, |offset, bytes| {
            // a disconnected receiver means the consumer bailed out
            sender
              .send(Ok(ReadBatch {
                thread,
                offset,
                bytes,
              }))
              .is_ok()
          });
          if let Err(e) = result {
            let _ = sender.send(Err(e));
          }
        });
      }
      drop(sender);

      let mut consumed = 0u64;
      let mut outcome = Ok(());
      for batch in receiver.iter() {
        let step = batch.and_then(|batch| {
          let len = batch.bytes.len() as u64;
          consume(batch).map(|_| len)
        });
        match step {
          Ok(len) => consumed += len,
          Err(e) => {
            outcome = Err(e);
            break;
          }
        }
        if stop.is_stopped() {
          outcome = Err(OctreeError::Cancelled);
          break;
        }
      }
      // unblock readers parked on a full queue
      drop(receiver);
      outcome.map(|_| consumed)
    })
  }
}

/// Read `[start, start + len)` in batches, handing each to `emit`.
/// Stops early when `emit` returns false.
fn read_range(
  path: &Path,
  start: u64,
  len: u64,
  batch_bytes: u64,
  stop: &StopSignal,
  mut emit: impl FnMut(u64, Vec<u8>) -> bool,
) -> Result<()> {
  let mut file = File::open(path).at_path(path)?;
  file.seek(SeekFrom::Start(start)).at_path(path)?;
  let mut offset = start;
  let end = start + len;
  while offset < end {
    stop.check()?;
    let n = batch_bytes.min(end - offset) as usize;
    let mut bytes = vec![0u8; n];
    file.read_exact(&mut bytes).at_path(path)?;
    if !emit(offset, bytes) {
      return Ok(());
    }
    offset += n as u64;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::ScratchDir;

  fn write_records(dir: &ScratchDir, count: u32) -> PathBuf {
    let path = dir.join("records.bin");
    let mut data = Vec::new();
    for i in 0..count {
      data.extend_from_slice(&i.to_le_bytes());
    }
    std::fs::write(&path, data).unwrap();
    path
  }

  #[test]
  fn test_ranges_are_stride_aligned_and_cover_file() {
    let dir = ScratchDir::new("reader_ranges");
    let path = write_records(&dir, 10);
    let reader = ParallelReader::new(&path, 4).threads(3);
    let ranges = reader.ranges().unwrap();
    assert_eq!(ranges, vec![(0, 16), (16, 12), (28, 12)]);
    assert!(ranges.iter().all(|(s, l)| s % 4 == 0 && l % 4 == 0));
  }

  #[test]
  fn test_more_threads_than_records() {
    let dir = ScratchDir::new("reader_few");
    let path = write_records(&dir, 2);
    let ranges = ParallelReader::new(&path, 4).threads(8).ranges().unwrap();
    assert_eq!(ranges.len(), 2);
  }

  /// Every record is delivered exactly once regardless of thread count.
  #[test]
  fn test_all_records_delivered_once() {
    let dir = ScratchDir::new("reader_all");
    let path = write_records(&dir, 10_000);
    let reader = ParallelReader::new(&path, 4)
      .threads(4)
      .batch_records(333)
      .max_queued(2);

    let mut seen = vec![false; 10_000];
    let consumed = reader
      .for_each_batch(&StopSignal::new(), |batch| {
        assert_eq!(batch.bytes.len() % 4, 0);
        for rec in batch.bytes.chunks_exact(4) {
          let i = u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]) as usize;
          assert!(!seen[i], "record {i} delivered twice");
          seen[i] = true;
        }
        Ok(())
      })
      .unwrap();
    assert_eq!(consumed, 40_000);
    assert!(seen.iter().all(|&s| s));
  }

  #[test]
  fn test_consumer_error_stops_readers() {
    let dir = ScratchDir::new("reader_err");
    let path = write_records(&dir, 10_000);
    let reader = ParallelReader::new(&path, 4).batch_records(10).max_queued(1);
    let mut calls = 0;
    let result = reader.for_each_batch(&StopSignal::new(), |_| {
      calls += 1;
      if calls == 3 {
        Err(OctreeError::Consistency("boom".into()))
      } else {
        Ok(())
      }
    });
    assert!(matches!(result, Err(OctreeError::Consistency(_))));
    assert_eq!(calls, 3);
  }

  #[test]
  fn test_misaligned_file_rejected() {
    let dir = ScratchDir::new("reader_misaligned");
    let path = dir.join("bad.bin");
    std::fs::write(&path, vec![0u8; 17]).unwrap();
    let result = ParallelReader::new(&path, 4).record_count();
    assert!(matches!(result, Err(OctreeError::Format(_))));
  }
}
