//! First pass: partition the source into disk-resident spatial chunks.
//!
//! ```text
//! count pass    stream points  ─►  fine Morton grid counts  ─►  CountPyramid
//! selection     pyramid.select(max_chunk_size)  ─►  fine cell → chunk LUT
//! scatter pass  stream points  ─►  group by chunk  ─►  WriterPool  ─►  rXXX.dat
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::pyramid::{Cell, CountPyramid};
use crate::config::BuildConfig;
use crate::constants::{CHUNK_EXTENSION, POINT_RECORD_SIZE};
use crate::error::{IoContext, OctreeError, Result};
use crate::geometry::{morton, point, Aabb, Point};
use crate::io::{StopSignal, WriterPool};
use crate::source::PointSource;

/// Points counted per rayon fold before merging.
const COUNT_GRAIN: usize = 1 << 14;

/// One chunk file.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
  /// Octant path from the root, which is also the file stem.
  pub name: String,
  pub cell: Cell,
  pub bounds: Aabb,
  pub path: PathBuf,
  pub point_count: u64,
}

/// Output of the chunking pass.
#[derive(Clone, Debug)]
pub struct ChunkSet {
  pub dir: PathBuf,
  /// Cubic bounds every chunk is carved from.
  pub root_bounds: Aabb,
  /// Tight source bounds.
  pub tight_bounds: Aabb,
  /// Chunks in Morton pre-order.
  pub chunks: Vec<Chunk>,
  pub point_count: u64,
}

impl ChunkSet {
  /// Remove the chunk directory.
  pub fn remove(&self) -> Result<()> {
    remove_dir_if_exists(&self.dir)
  }
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
  match std::fs::remove_dir_all(dir) {
    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(OctreeError::io(dir, e)),
    _ => Ok(()),
  }
}

/// Run both chunking passes, writing chunk files into `dir`.
///
/// `dir` is cleared first. On failure the partially written chunk files
/// are removed.
#[tracing::instrument(skip_all, name = "build::chunk")]
pub fn chunk_points<S: PointSource + ?Sized>(
  source: &S,
  dir: &Path,
  config: &BuildConfig,
  stop: &StopSignal,
) -> Result<ChunkSet> {
  remove_dir_if_exists(dir)?;
  std::fs::create_dir_all(dir).at_path(dir)?;
  let result = run_passes(source, dir, config, stop);
  if result.is_err() {
    if let Err(e) = remove_dir_if_exists(dir) {
      tracing::warn!(error = %e, "could not remove partial chunk files");
    }
  }
  result
}

fn run_passes<S: PointSource + ?Sized>(
  source: &S,
  dir: &Path,
  config: &BuildConfig,
  stop: &StopSignal,
) -> Result<ChunkSet> {
  let tight_bounds = source.bounds();
  let root_bounds = tight_bounds.cubic();
  let grid = config.chunk_grid_size();
  let batch = config.read_batch_points.max(1);

  let counts = count_pass(source, &root_bounds, grid, batch, stop)?;
  let pyramid = CountPyramid::from_fine(counts);
  let expected = source.point_count();
  if pyramid.total() != expected {
    return Err(OctreeError::Consistency(format!(
      "count pass saw {} points, source reports {expected}",
      pyramid.total()
    )));
  }

  let cells = pyramid.select(config.max_chunk_size);
  let lut = pyramid.lookup_table(&cells);
  let chunks: Vec<Chunk> = cells
    .iter()
    .map(|&cell| {
      let name = morton::node_name(cell.code, cell.level);
      let path = dir.join(format!("{name}.{CHUNK_EXTENSION}"));
      Chunk {
        bounds: root_bounds.descend(morton::octant_path(cell.code, cell.level)),
        point_count: pyramid.count(cell),
        name,
        cell,
        path,
      }
    })
    .collect();
  tracing::info!(
    chunks = chunks.len(),
    points = expected,
    grid,
    "chunk selection done"
  );

  let pool = WriterPool::new(
    dir,
    config.writer_threads,
    config.writer_memory_cap,
    stop.clone(),
  )?;
  let file_names: Vec<String> = chunks
    .iter()
    .map(|c| format!("{}.{CHUNK_EXTENSION}", c.name))
    .collect();
  source.stream_points(batch, stop, &mut |points| {
    scatter_batch(points, &root_bounds, grid, &lut, &file_names, &pool)
  })?;
  let written = pool.finish()?;

  let scattered = written / POINT_RECORD_SIZE as u64;
  if scattered != expected {
    return Err(OctreeError::Consistency(format!(
      "scattered {scattered} points, count pass saw {expected}"
    )));
  }
  for chunk in &chunks {
    let on_disk = std::fs::metadata(&chunk.path).at_path(&chunk.path)?.len();
    if on_disk != chunk.point_count * POINT_RECORD_SIZE as u64 {
      return Err(OctreeError::Consistency(format!(
        "{} holds {on_disk} bytes for {} counted points",
        chunk.path.display(),
        chunk.point_count
      )));
    }
  }

  Ok(ChunkSet {
    dir: dir.to_path_buf(),
    root_bounds,
    tight_bounds,
    chunks,
    point_count: expected,
  })
}

/// Per-cell counts of the fine grid, Morton indexed.
fn count_pass<S: PointSource + ?Sized>(
  source: &S,
  bounds: &Aabb,
  grid: u32,
  batch: usize,
  stop: &StopSignal,
) -> Result<Vec<u64>> {
  let cells = (grid as usize).pow(3);
  let mut counts = vec![0u64; cells];
  source.stream_points(batch, stop, &mut |points| {
    let partial = points
      .par_chunks(COUNT_GRAIN)
      .fold(
        || vec![0u64; cells],
        |mut acc, chunk| {
          for p in chunk {
            acc[bounds.morton_cell_of(p.position, grid) as usize] += 1;
          }
          acc
        },
      )
      .reduce(
        || vec![0u64; cells],
        |mut a, b| {
          a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
          a
        },
      );
    counts.iter_mut().zip(&partial).for_each(|(x, y)| *x += y);
    Ok(())
  })?;
  Ok(counts)
}

fn scatter_batch(
  points: &[Point],
  bounds: &Aabb,
  grid: u32,
  lut: &[u32],
  file_names: &[String],
  pool: &WriterPool,
) -> Result<()> {
  let targets: Vec<u32> = points
    .par_iter()
    .map(|p| lut[bounds.morton_cell_of(p.position, grid) as usize])
    .collect();

  let mut groups: HashMap<u32, Vec<Point>> = HashMap::new();
  for (p, &target) in points.iter().zip(&targets) {
    if target == u32::MAX {
      return Err(OctreeError::Consistency(format!(
        "point {} falls in a cell the count pass saw as empty",
        p.position
      )));
    }
    groups.entry(target).or_default().push(*p);
  }

  let mut bytes = Vec::new();
  for (target, group) in groups {
    bytes.clear();
    point::encode_points_into(&group, &mut bytes);
    pool.write(&file_names[target as usize], &bytes)?;
  }
  Ok(())
}
