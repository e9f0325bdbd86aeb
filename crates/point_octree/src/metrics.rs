//! Build and streaming statistics.
//!
//! Feature-gated and runtime-toggled so recording costs nothing when
//! disabled.
//!
//! # Usage
//!
//! ```ignore
//! use point_octree::metrics::{StreamMetrics, COLLECT_METRICS};
//!
//! // Compile with --features metrics
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! let snapshot = session.metrics();
//! println!("avg traversal {:.1} us", snapshot.avg_traversal_us());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

use crate::build::BuildReport;

/// Runtime toggle for metrics collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// True when compiled with `metrics` and the runtime toggle is on.
#[inline]
pub fn is_enabled() -> bool {
  #[cfg(feature = "metrics")]
  {
    COLLECT_METRICS.load(Ordering::Relaxed)
  }
  #[cfg(not(feature = "metrics"))]
  {
    false
  }
}

/// Fixed-capacity history, oldest value evicted first.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
  buffer: VecDeque<T>,
  capacity: usize,
}

impl<T> RollingWindow<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, value: T) {
    if self.buffer.len() >= self.capacity {
      self.buffer.pop_front();
    }
    self.buffer.push_back(value);
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  pub fn last(&self) -> Option<&T> {
    self.buffer.back()
  }

  /// Values oldest to newest.
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.buffer.iter()
  }
}

impl RollingWindow<u64> {
  pub fn sum(&self) -> u64 {
    self.buffer.iter().sum()
  }

  pub fn average(&self) -> f64 {
    if self.buffer.is_empty() {
      0.0
    } else {
      self.sum() as f64 / self.buffer.len() as f64
    }
  }

  pub fn min_max(&self) -> Option<(u64, u64)> {
    let min = self.buffer.iter().min()?;
    let max = self.buffer.iter().max()?;
    Some((*min, *max))
  }
}

impl Default for RollingWindow<u64> {
  fn default() -> Self {
    // ~6 seconds of 50 ms traversal passes
    Self::new(128)
  }
}

/// Runtime streaming statistics, one instance per session.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
  /// Traversal pass durations in microseconds.
  pub traversal_timings: RollingWindow<u64>,
  /// Payload read + decode durations in microseconds.
  pub load_timings: RollingWindow<u64>,
  pub loads_completed: u64,
  pub loads_failed: u64,
  /// Nodes evicted from the cache, cumulative.
  pub evictions: u64,
  /// Proxy nodes expanded, cumulative.
  pub proxies_expanded: u64,
  /// Points resident in the cache after the last pass.
  pub resident_points: u64,
  /// Nodes selected for rendering by the last pass.
  pub visible_nodes: u32,
}

impl StreamMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_traversal(&mut self, timing_us: u64, visible_nodes: u32, resident_points: u64) {
    if is_enabled() {
      self.traversal_timings.push(timing_us);
      self.visible_nodes = visible_nodes;
      self.resident_points = resident_points;
    }
  }

  pub fn record_load(&mut self, timing_us: u64, ok: bool) {
    if !is_enabled() {
      return;
    }
    if ok {
      self.load_timings.push(timing_us);
      self.loads_completed += 1;
    } else {
      self.loads_failed += 1;
    }
  }

  pub fn record_evictions(&mut self, count: usize) {
    if is_enabled() {
      self.evictions += count as u64;
    }
  }

  pub fn record_proxy_expansion(&mut self) {
    if is_enabled() {
      self.proxies_expanded += 1;
    }
  }

  pub fn avg_traversal_us(&self) -> f64 {
    self.traversal_timings.average()
  }

  pub fn avg_load_us(&self) -> f64 {
    self.load_timings.average()
  }
}

/// Accumulated build statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct BuildMetrics {
  pub chunk_timings: RollingWindow<u64>,
  pub index_timings: RollingWindow<u64>,
  pub serialize_timings: RollingWindow<u64>,
  pub builds: u64,
  pub points_processed: u64,
  pub nodes_written: u64,
}

impl BuildMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, report: &BuildReport) {
    if !is_enabled() {
      return;
    }
    self.chunk_timings.push(report.timings.chunk_us);
    self.index_timings.push(report.timings.index_us);
    self.serialize_timings.push(report.timings.serialize_us);
    self.builds += 1;
    self.points_processed += report.point_count;
    self.nodes_written += report.node_count as u64;
  }

  /// Points per second over all recorded builds.
  pub fn throughput(&self) -> f64 {
    let total_us = self.chunk_timings.sum() + self.index_timings.sum() + self.serialize_timings.sum();
    if total_us == 0 {
      0.0
    } else {
      self.points_processed as f64 / (total_us as f64 / 1_000_000.0)
    }
  }
}
