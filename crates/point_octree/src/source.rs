//! Point sources: the input collaborator of the build pipeline.
//!
//! Format-specific readers (PLY, LAS, ...) live outside this crate and
//! implement [`PointSource`]. Two sources ship here: an in-memory vector and
//! a raw file of 15-byte records.

use std::path::{Path, PathBuf};

use crate::constants::POINT_RECORD_SIZE;
use crate::error::{OctreeError, Result};
use crate::geometry::{point, Aabb, Point};
use crate::io::{ParallelReader, StopSignal};

/// Streamable point set with known count and bounds.
pub trait PointSource: Sync {
  /// Total number of points.
  fn point_count(&self) -> u64;

  /// Tight bounds of all points.
  fn bounds(&self) -> Aabb;

  /// Stream every point exactly once in batches of at most `batch_points`.
  ///
  /// Batch order is unspecified. An error from `sink` aborts the stream and
  /// is returned.
  fn stream_points(
    &self,
    batch_points: usize,
    stop: &StopSignal,
    sink: &mut dyn FnMut(&[Point]) -> Result<()>,
  ) -> Result<()>;
}

/// Vector-backed source.
#[derive(Clone, Debug)]
pub struct MemoryPointSource {
  points: Vec<Point>,
  bounds: Aabb,
}

impl MemoryPointSource {
  pub fn new(points: Vec<Point>) -> Self {
    let bounds = Aabb::from_positions(points.iter().map(|p| p.position))
      .unwrap_or_else(|| Aabb::new(glam::Vec3::ZERO, glam::Vec3::ZERO));
    Self { points, bounds }
  }

  pub fn points(&self) -> &[Point] {
    &self.points
  }
}

impl PointSource for MemoryPointSource {
  fn point_count(&self) -> u64 {
    self.points.len() as u64
  }

  fn bounds(&self) -> Aabb {
    self.bounds
  }

  fn stream_points(
    &self,
    batch_points: usize,
    stop: &StopSignal,
    sink: &mut dyn FnMut(&[Point]) -> Result<()>,
  ) -> Result<()> {
    for batch in self.points.chunks(batch_points.max(1)) {
      stop.check()?;
      sink(batch)?;
    }
    Ok(())
  }
}

/// File of raw float point records, streamed by a [`ParallelReader`].
#[derive(Clone, Debug)]
pub struct RawPointFile {
  path: PathBuf,
  count: u64,
  bounds: Aabb,
  threads: usize,
  max_queued_batches: usize,
}

impl RawPointFile {
  /// Open `path` and run the initial bounds pass.
  pub fn open(path: impl AsRef<Path>, threads: usize, max_queued_batches: usize) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let reader = ParallelReader::new(&path, POINT_RECORD_SIZE)
      .threads(threads)
      .max_queued(max_queued_batches);
    let count = reader.record_count()?;

    let mut bounds = Aabb::empty();
    reader.for_each_batch(&StopSignal::new(), |batch| {
      for p in point::decode_points(&batch.bytes)? {
        bounds.expand(p.position);
      }
      Ok(())
    })?;
    if count > 0 && bounds.is_empty() {
      return Err(OctreeError::Format(format!(
        "{}: no finite positions found",
        path.display()
      )));
    }
    if count == 0 {
      bounds = Aabb::new(glam::Vec3::ZERO, glam::Vec3::ZERO);
    }

    tracing::debug!(path = %path.display(), count, "opened raw point file");
    Ok(Self {
      path,
      count,
      bounds,
      threads,
      max_queued_batches,
    })
  }

  /// Write `points` as a raw record file.
  pub fn write(path: impl AsRef<Path>, points: &[Point]) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, point::encode_points(points)).map_err(|e| OctreeError::io(path, e))
  }
}

impl PointSource for RawPointFile {
  fn point_count(&self) -> u64 {
    self.count
  }

  fn bounds(&self) -> Aabb {
    self.bounds
  }

  fn stream_points(
    &self,
    batch_points: usize,
    stop: &StopSignal,
    sink: &mut dyn FnMut(&[Point]) -> Result<()>,
  ) -> Result<()> {
    let reader = ParallelReader::new(&self.path, POINT_RECORD_SIZE)
      .threads(self.threads)
      .batch_records(batch_points)
      .max_queued(self.max_queued_batches);
    reader.for_each_batch(stop, |batch| {
      let points = point::decode_points(&batch.bytes)?;
      sink(&points)
    })?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{uniform_cube, ScratchDir};

  #[test]
  fn test_memory_source_batches() {
    let source = MemoryPointSource::new(uniform_cube(1000, 10.0, 1));
    let mut batches = 0;
    let mut total = 0;
    source
      .stream_points(300, &StopSignal::new(), &mut |b| {
        assert!(b.len() <= 300);
        batches += 1;
        total += b.len();
        Ok(())
      })
      .unwrap();
    assert_eq!((batches, total), (4, 1000));
  }

  #[test]
  fn test_raw_file_bounds_and_stream() {
    let dir = ScratchDir::new("raw_source");
    let points = uniform_cube(5000, 3.0, 2);
    let path = dir.join("cloud.raw");
    RawPointFile::write(&path, &points).unwrap();

    let source = RawPointFile::open(&path, 3, 2).unwrap();
    assert_eq!(source.point_count(), 5000);
    let expected = MemoryPointSource::new(points.clone()).bounds();
    assert_eq!(source.bounds(), expected);

    let mut total = 0usize;
    source
      .stream_points(512, &StopSignal::new(), &mut |b| {
        total += b.len();
        Ok(())
      })
      .unwrap();
    assert_eq!(total, 5000);
  }

  #[test]
  fn test_stopped_stream_is_cancelled() {
    let source = MemoryPointSource::new(uniform_cube(10, 1.0, 3));
    let stop = StopSignal::new();
    stop.stop();
    let result = source.stream_points(4, &stop, &mut |_| Ok(()));
    assert!(matches!(result, Err(OctreeError::Cancelled)));
  }
}
