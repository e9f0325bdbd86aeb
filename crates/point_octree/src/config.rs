//! Build and streaming configuration.
//!
//! Both configs load from TOML with every field optional:
//!
//! ```toml
//! chunk_depth = 5
//! max_chunk_size = 10000000
//! max_node_size = 20000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, OctreeError, Result};

/// Parameters of the offline build pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  /// Levels of the chunker's counting pyramid. The fine grid has
  /// `2^(chunk_depth - 1)` cells per axis.
  pub chunk_depth: u32,
  /// A pyramid cell becomes a chunk once it holds at most this many points.
  pub max_chunk_size: u64,
  /// Levels of the indexer's per-pass sub-grid (`2^(tree_depth - 1)` per axis).
  pub tree_depth: u32,
  /// A node becomes a leaf once it holds at most this many points.
  pub max_node_size: u32,
  /// Cells per axis of the subsampling voxel grid.
  pub subsample_grid: u32,
  /// Minimum accepted spacing as a fraction of half a cell diagonal.
  pub subsample_radius_factor: f32,
  /// Threads of the parallel chunked reader.
  pub reader_threads: usize,
  /// Threads of the multi-destination writer pool.
  pub writer_threads: usize,
  /// Points per streamed batch.
  pub read_batch_points: usize,
  /// Batches allowed in flight between reader threads and the consumer.
  pub max_queued_batches: usize,
  /// Queued bytes above which writer producers block.
  pub writer_memory_cap: u64,
  /// Levels per hierarchy page.
  pub hierarchy_step: u32,
  /// Emit `hierarchy.bin` next to the flat table.
  pub write_hierarchy: bool,
  /// Keep `chunks/` after a successful build.
  pub keep_chunks: bool,
}

impl BuildConfig {
  /// Defaults sized for clouds of hundreds of millions of points.
  pub const DEFAULT: Self = Self {
    chunk_depth: 5,
    max_chunk_size: 10_000_000,
    tree_depth: 3,
    max_node_size: 20_000,
    subsample_grid: 128,
    subsample_radius_factor: 0.7,
    reader_threads: 4,
    writer_threads: 4,
    read_batch_points: 1_000_000,
    max_queued_batches: 8,
    writer_memory_cap: 100 * 1024 * 1024,
    hierarchy_step: 4,
    write_hierarchy: true,
    keep_chunks: false,
  };

  /// Small thresholds for tests and tiny clouds.
  pub const SMALL: Self = Self {
    chunk_depth: 4,
    max_chunk_size: 2_000,
    tree_depth: 3,
    max_node_size: 500,
    subsample_grid: 32,
    subsample_radius_factor: 0.7,
    reader_threads: 2,
    writer_threads: 2,
    read_batch_points: 1_024,
    max_queued_batches: 4,
    writer_memory_cap: 1024 * 1024,
    hierarchy_step: 2,
    write_hierarchy: true,
    keep_chunks: false,
  };

  /// Parse from a TOML string; missing fields take their defaults.
  pub fn from_toml_str(text: &str) -> Result<Self> {
    let config: Self =
      toml::from_str(text).map_err(|e| OctreeError::Config(format!("invalid TOML: {e}")))?;
    config.validate()?;
    Ok(config)
  }

  /// Load from a TOML file.
  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).at_path(path)?;
    Self::from_toml_str(&text)
  }

  /// Fine-grid cells per axis of the chunker.
  #[inline]
  pub fn chunk_grid_size(&self) -> u32 {
    1 << (self.chunk_depth - 1)
  }

  /// Sub-grid cells per axis of one indexing pass.
  #[inline]
  pub fn tree_grid_size(&self) -> u32 {
    1 << (self.tree_depth - 1)
  }

  /// Reject values the pipeline cannot run with.
  pub fn validate(&self) -> Result<()> {
    let fail = |msg: &str| Err(OctreeError::Config(msg.to_string()));
    if !(1..=8).contains(&self.chunk_depth) {
      return fail("chunk_depth must be in 1..=8");
    }
    if !(1..=6).contains(&self.tree_depth) {
      return fail("tree_depth must be in 1..=6");
    }
    if self.max_chunk_size == 0 || self.max_node_size == 0 {
      return fail("max_chunk_size and max_node_size must be positive");
    }
    if !(1..=512).contains(&self.subsample_grid) {
      return fail("subsample_grid must be in 1..=512");
    }
    if !(self.subsample_radius_factor > 0.0) {
      return fail("subsample_radius_factor must be positive");
    }
    if self.reader_threads == 0 || self.writer_threads == 0 {
      return fail("thread counts must be positive");
    }
    if self.read_batch_points == 0 || self.max_queued_batches == 0 {
      return fail("read_batch_points and max_queued_batches must be positive");
    }
    if self.writer_memory_cap == 0 {
      return fail("writer_memory_cap must be positive");
    }
    if self.hierarchy_step == 0 {
      return fail("hierarchy_step must be positive");
    }
    Ok(())
  }
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// Parameters of the runtime loader, cache, and traversal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
  /// Total resident points allowed in the cache.
  pub point_budget: u64,
  /// Node payload loads allowed in flight.
  pub max_concurrent_loads: usize,
  /// Nodes projecting smaller than this are not expanded.
  pub min_node_pixel_size: f32,
  /// Pause between traversal passes.
  pub traversal_interval_ms: u64,
  /// Invisible loaded nodes at or below this level are disposed, their
  /// loaded subtrees with them. Level 0 is the root.
  pub dispose_depth_floor: u32,
}

impl StreamConfig {
  /// Desktop-class defaults.
  pub const DEFAULT: Self = Self {
    point_budget: 2_000_000,
    max_concurrent_loads: 20,
    min_node_pixel_size: 100.0,
    traversal_interval_ms: 50,
    dispose_depth_floor: 2,
  };

  /// Tight budget for memory-constrained targets.
  pub const LOW_MEMORY: Self = Self {
    point_budget: 300_000,
    max_concurrent_loads: 4,
    min_node_pixel_size: 150.0,
    traversal_interval_ms: 100,
    dispose_depth_floor: 1,
  };

  /// Parse from a TOML string; missing fields take their defaults.
  pub fn from_toml_str(text: &str) -> Result<Self> {
    let config: Self =
      toml::from_str(text).map_err(|e| OctreeError::Config(format!("invalid TOML: {e}")))?;
    config.validate()?;
    Ok(config)
  }

  /// Load from a TOML file.
  pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).at_path(path)?;
    Self::from_toml_str(&text)
  }

  /// Reject values the runtime cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.point_budget == 0 {
      return Err(OctreeError::Config("point_budget must be positive".into()));
    }
    if self.max_concurrent_loads == 0 {
      return Err(OctreeError::Config(
        "max_concurrent_loads must be positive".into(),
      ));
    }
    if !(self.min_node_pixel_size >= 0.0) {
      return Err(OctreeError::Config(
        "min_node_pixel_size must be non-negative".into(),
      ));
    }
    Ok(())
  }
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
