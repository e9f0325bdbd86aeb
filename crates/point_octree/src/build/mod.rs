//! Offline build pipeline.
//!
//! ```text
//! PointSource ─► chunker ─► chunks/r*.dat
//!                              │ per chunk
//!                              ▼
//!                  indexer ─► subsample ─► flush final nodes ─► octree.stage
//!                              │ chunk roots stay resident
//!                              ▼
//!                  skeleton ─► subsample ─► flush ─► flatten
//!                                                      │ pre-order copy
//!                                                      ▼
//!                  octree.dat, meta.dat, hierarchy.bin, cloud.json
//! ```

pub mod chunker;
pub mod indexer;
pub mod node;
pub mod pyramid;
pub mod serializer;
pub mod stitcher;
pub mod subsample;

use std::path::{Path, PathBuf};

use web_time::Instant;

pub use chunker::{Chunk, ChunkSet};
pub use node::Node;
pub use serializer::{flatten, write_preorder, FlatTables, PayloadWriter};
pub use subsample::Subsampler;

use crate::config::BuildConfig;
use crate::constants::{
  CHUNK_DIR, HIERARCHY_FILE, MANIFEST_FILE, META_FILE, OCTREE_FILE, PAYLOAD_STAGE_FILE,
};
use crate::error::{IoContext, OctreeError, Result};
use crate::format::manifest::{CloudManifest, HierarchyInfo};
use crate::format::{hierarchy, node_entry};
use crate::geometry::point::ensure_little_endian;
use crate::io::StopSignal;
use crate::source::PointSource;

/// Wall-clock time per build phase, in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTimings {
  pub chunk_us: u64,
  /// Indexing and subsampling, interleaved per chunk.
  pub index_us: u64,
  pub serialize_us: u64,
}

impl PhaseTimings {
  pub fn total_us(&self) -> u64 {
    self.chunk_us + self.index_us + self.serialize_us
  }
}

/// Summary of a finished build.
#[derive(Clone, Debug)]
pub struct BuildReport {
  pub out_dir: PathBuf,
  pub chunk_count: usize,
  pub node_count: usize,
  pub point_count: u64,
  /// Bytes in `octree.dat`.
  pub payload_bytes: u64,
  /// Deepest node level.
  pub max_level: usize,
  /// Chunks in `hierarchy.bin`, 0 when not written.
  pub hierarchy_chunks: usize,
  pub timings: PhaseTimings,
}

/// Build the octree for `source` into `out_dir`.
///
/// Any consistency or I/O failure aborts the build; the chunk directory is
/// removed either way unless `keep_chunks` is set on success.
pub fn build_octree<S: PointSource + ?Sized>(
  source: &S,
  out_dir: impl AsRef<Path>,
  config: &BuildConfig,
  stop: &StopSignal,
) -> Result<BuildReport> {
  let out_dir = out_dir.as_ref();
  config.validate()?;
  ensure_little_endian()?;
  if source.point_count() == 0 {
    return Err(OctreeError::Format("point source is empty".into()));
  }
  std::fs::create_dir_all(out_dir).at_path(out_dir)?;

  let mut timings = PhaseTimings::default();
  let start = Instant::now();
  let chunks = chunker::chunk_points(source, &out_dir.join(CHUNK_DIR), config, stop)?;
  timings.chunk_us = start.elapsed().as_micros() as u64;

  let result = index_and_write(&chunks, out_dir, config, stop, &mut timings);
  let staged = out_dir.join(PAYLOAD_STAGE_FILE);
  match std::fs::remove_file(&staged) {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => tracing::warn!(error = %e, path = %staged.display(), "could not remove staged payloads"),
  }
  if result.is_err() || !config.keep_chunks {
    if let Err(e) = chunks.remove() {
      tracing::warn!(error = %e, "could not remove chunk directory");
    }
  }
  let mut report = result?;
  report.timings = timings;
  tracing::info!(
    nodes = report.node_count,
    chunks = report.chunk_count,
    points = report.point_count,
    bytes = report.payload_bytes,
    total_ms = timings.total_us() / 1000,
    "octree build complete"
  );
  Ok(report)
}

fn index_and_write(
  chunks: &ChunkSet,
  out_dir: &Path,
  config: &BuildConfig,
  stop: &StopSignal,
  timings: &mut PhaseTimings,
) -> Result<BuildReport> {
  let start = Instant::now();
  let staged = out_dir.join(PAYLOAD_STAGE_FILE);
  let mut payload = PayloadWriter::create(
    &staged,
    config.writer_memory_cap,
    stop.clone(),
  )?;
  let mut subsampler = Subsampler::from_config(config);
  let mut root = stitcher::stitch_chunks(chunks, config, stop, &mut subsampler, &mut |node| {
    payload.flush(node)
  })?;
  payload.flush(&mut root)?;
  timings.index_us = start.elapsed().as_micros() as u64;

  let start = Instant::now();
  let flushed_points = payload.points_flushed();
  payload.finish()?;
  if flushed_points != chunks.point_count {
    return Err(OctreeError::Consistency(format!(
      "flushed {flushed_points} points of {}",
      chunks.point_count
    )));
  }

  let node_count = root.refresh_descendant_counts() as usize;
  let mut tables = flatten(&root)?;
  let stats = write_preorder(
    &mut tables,
    &staged,
    &out_dir.join(OCTREE_FILE),
    config.writer_memory_cap,
    stop.clone(),
  )?;
  node_entry::validate_table(&tables.entries)?;
  if tables.entries[0].descendant_count != root.descendant_count {
    return Err(OctreeError::Consistency(format!(
      "table root spans {} descendants, tree has {}",
      tables.entries[0].descendant_count, root.descendant_count
    )));
  }
  node_entry::write_table(&out_dir.join(META_FILE), &tables.entries)?;

  let mut manifest = CloudManifest::new(
    chunks.point_count,
    node_count as u64,
    &chunks.root_bounds,
    &chunks.tight_bounds,
  );
  let mut hierarchy_chunks = 0;
  if config.write_hierarchy {
    let encoded = hierarchy::encode_hierarchy(&tables.hierarchy, config.hierarchy_step)?;
    let path = out_dir.join(HIERARCHY_FILE);
    std::fs::write(&path, &encoded.bytes).at_path(&path)?;
    hierarchy_chunks = encoded.chunk_count;
    manifest.hierarchy = Some(HierarchyInfo {
      first_chunk_size: encoded.root_chunk_size,
      step: config.hierarchy_step,
    });
  }
  manifest.write(&out_dir.join(MANIFEST_FILE))?;
  timings.serialize_us = start.elapsed().as_micros() as u64;

  Ok(BuildReport {
    out_dir: out_dir.to_path_buf(),
    chunk_count: chunks.chunks.len(),
    node_count,
    point_count: chunks.point_count,
    payload_bytes: stats.file_len,
    max_level: root.max_level(),
    hierarchy_chunks,
    timings: PhaseTimings::default(),
  })
}
