//! Level-of-detail selection over the runtime node tree.
//!
//! Each pass walks nodes largest-projected-size first, from the root:
//!
//! 1. Load completions posted since the last pass are applied: the node
//!    enters the cache, and whatever the cache evicts is unloaded.
//! 2. A node outside the frustum or smaller than `min_node_pixel_size` is
//!    not expanded. At or below `dispose_depth_floor` its loaded subtree is
//!    dropped on the spot.
//! 3. A loaded node that fits the remaining point budget is rendered. An
//!    unloaded one is requested from the loader, a proxy from the hierarchy
//!    loader. Its children become candidates either way.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{self, AtomicUsize};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::Mutex;
use web_time::Instant;

use super::cache::{Insertion, LruCache};
use super::frame::RenderNode;
use super::geometry::OctreeGeometry;
use super::hierarchy_loader::HierarchyLoader;
use super::loader::{LoadCompletion, NodeLoader};
use super::node::{GeometryNode, LoadState, NodeId};
use crate::config::StreamConfig;
use crate::format::NodeKind;
use crate::geometry::{Aabb, AttributeBuffers, Frustum};
use crate::io::POLL_INTERVAL;
use crate::metrics::StreamMetrics;

/// Viewer parameters supplied by the front end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
  pub position: Vec3,
  pub frustum: Frustum,
  /// Vertical field of view in radians.
  pub fov_y: f32,
  /// Viewport height in pixels.
  pub screen_height: f32,
}

impl CameraState {
  pub fn new(position: Vec3, frustum: Frustum, fov_y: f32, screen_height: f32) -> Self {
    Self {
      position,
      frustum,
      fov_y,
      screen_height,
    }
  }

  /// Right-handed perspective camera at `eye` looking at `target`.
  pub fn looking_at(eye: Vec3, target: Vec3, fov_y: f32, screen: (f32, f32)) -> Self {
    let (width, height) = screen;
    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    let proj = Mat4::perspective_rh(fov_y, width / height.max(1.0), 0.01, 1.0e6);
    Self::new(eye, Frustum::from_view_projection(&(proj * view)), fov_y, height)
  }

  /// Approximate on-screen diameter in pixels of the bounding sphere of
  /// `bounds`. Infinite when the camera is inside the sphere.
  pub fn projected_size(&self, bounds: &Aabb) -> f32 {
    let radius = bounds.half_diagonal();
    let distance = self.position.distance(bounds.center());
    if distance <= radius {
      return f32::INFINITY;
    }
    let slope = (self.fov_y * 0.5).tan();
    (self.screen_height * 0.5) / (slope * distance) * radius
  }
}

/// Counters of one pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraversalStats {
  pub visited: u32,
  pub rendered: u32,
  pub culled: u32,
  pub too_small: u32,
  pub loads_requested: u32,
  pub proxies_requested: u32,
  pub disposed: u32,
  /// Nodes inspected while disposing; unloaded subtrees are not entered.
  pub dispose_checked: u32,
  pub evicted: u32,
  /// Failed loads, each completed empty and unloaded again.
  pub load_failures: u32,
  /// Points of the render budget left unused.
  pub remaining_budget: u64,
}

/// Result of one pass, ready to publish.
#[derive(Debug, Default)]
pub struct TraversalOutput {
  pub render: Vec<RenderNode>,
  pub delete: Vec<NodeId>,
  pub stats: TraversalStats,
}

#[derive(Debug)]
struct Candidate {
  priority: f32,
  id: NodeId,
}

impl PartialEq for Candidate {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Candidate {
  fn cmp(&self, other: &Self) -> Ordering {
    // ties go to the node discovered first
    self
      .priority
      .total_cmp(&other.priority)
      .then_with(|| other.id.cmp(&self.id))
  }
}

/// Outstanding background work of a [`Traverser`], observable without it.
#[derive(Clone)]
pub struct IdleWatch {
  loads: Arc<AtomicUsize>,
  proxies: Option<Arc<Mutex<HashSet<NodeId>>>>,
}

impl IdleWatch {
  pub fn is_idle(&self) -> bool {
    self.loads.load(atomic::Ordering::Acquire) == 0
      && self.proxies.as_ref().map_or(true, |p| p.lock().is_empty())
  }

  /// Spin-sleep until idle or `timeout_ms` passes.
  pub fn wait(&self, timeout_ms: u64) -> bool {
    let start = Instant::now();
    while !self.is_idle() {
      if start.elapsed().as_millis() as u64 >= timeout_ms {
        return false;
      }
      std::thread::sleep(POLL_INTERVAL);
    }
    true
  }
}

/// Owns the cache and both loaders; runs one pass at a time.
pub struct Traverser {
  geometry: Arc<OctreeGeometry>,
  config: StreamConfig,
  cache: Arc<Mutex<LruCache>>,
  loader: NodeLoader,
  hierarchy: Option<HierarchyLoader>,
  metrics: Arc<Mutex<StreamMetrics>>,
  proxies_seen: u64,
}

impl Traverser {
  pub fn new(
    geometry: Arc<OctreeGeometry>,
    config: StreamConfig,
    hierarchy: Option<HierarchyLoader>,
    metrics: Arc<Mutex<StreamMetrics>>,
  ) -> Self {
    Self {
      loader: NodeLoader::new(Arc::clone(&geometry), config.max_concurrent_loads),
      cache: Arc::new(Mutex::new(LruCache::new(config.point_budget))),
      geometry,
      config,
      hierarchy,
      metrics,
      proxies_seen: 0,
    }
  }

  pub fn cache(&self) -> &Arc<Mutex<LruCache>> {
    &self.cache
  }

  pub fn loader(&self) -> &NodeLoader {
    &self.loader
  }

  pub fn hierarchy(&self) -> Option<&HierarchyLoader> {
    self.hierarchy.as_ref()
  }

  pub fn idle_watch(&self) -> IdleWatch {
    IdleWatch {
      loads: self.loader.in_flight_counter(),
      proxies: self.hierarchy.as_ref().map(HierarchyLoader::pending_set),
    }
  }

  /// Wait until no payload load or proxy expansion is outstanding.
  pub fn wait_idle(&self, timeout_ms: u64) -> bool {
    self.idle_watch().wait(timeout_ms)
  }

  /// One full pass for `camera`.
  #[tracing::instrument(skip_all, name = "runtime::traverse")]
  pub fn pass(&mut self, camera: &CameraState) -> TraversalOutput {
    let start = Instant::now();
    let mut out = TraversalOutput::default();
    self.apply_completions(&mut out);
    self.walk(camera, &mut out);

    if let Some(hierarchy) = &self.hierarchy {
      let expanded = hierarchy.expanded();
      let mut metrics = self.metrics.lock();
      for _ in self.proxies_seen..expanded {
        metrics.record_proxy_expansion();
      }
      self.proxies_seen = expanded;
    }
    let resident = self.cache.lock().resident_points();
    let elapsed_us = start.elapsed().as_micros() as u64;
    {
      let mut metrics = self.metrics.lock();
      metrics.record_traversal(elapsed_us, out.stats.rendered, resident);
      metrics.record_evictions((out.stats.evicted + out.stats.disposed) as usize);
    }
    tracing::trace!(
      rendered = out.stats.rendered,
      visited = out.stats.visited,
      resident,
      elapsed_us,
      "traversal pass"
    );
    out
  }

  fn apply_completions(&mut self, out: &mut TraversalOutput) {
    for LoadCompletion {
      id,
      outcome,
      elapsed_us,
    } in self.loader.drain()
    {
      let Some(node) = self.geometry.node(id) else {
        continue;
      };
      match outcome {
        Ok(payload) => {
          self.metrics.lock().record_load(elapsed_us, true);
          if !node.finish_load(payload) {
            continue;
          }
          let points = u64::from(node.point_count());
          let insertion = self.cache.lock().insert(id, points, &*self.geometry);
          match insertion {
            Insertion::Inserted { evicted } => {
              for victim in evicted {
                if self.geometry.node(victim).is_some_and(|n| n.unload()) {
                  out.stats.evicted += 1;
                  out.delete.push(victim);
                }
              }
            }
            Insertion::Rejected => {
              // cannot fit even in an empty cache; stays unloaded
              tracing::debug!(node = %node.name, points, "node exceeds point budget");
              node.unload();
            }
          }
        }
        Err(e) => {
          self.metrics.lock().record_load(elapsed_us, false);
          tracing::warn!(node = %node.name, error = %e, "node load failed");
          // completes empty, skips the cache, unloads for a later retry
          if node.finish_load(Arc::new(AttributeBuffers::default())) && node.unload() {
            out.stats.load_failures += 1;
          }
        }
      }
    }
  }

  fn walk(&mut self, camera: &CameraState, out: &mut TraversalOutput) {
    let mut remaining = self.config.point_budget;
    let mut heap = BinaryHeap::new();
    heap.push(Candidate {
      priority: f32::INFINITY,
      id: self.geometry.root(),
    });

    while let Some(Candidate { id, .. }) = heap.pop() {
      let Some(node) = self.geometry.node(id) else {
        continue;
      };
      out.stats.visited += 1;

      if !camera.frustum.intersects_aabb(&node.bounds) {
        out.stats.culled += 1;
        self.maybe_dispose(&node, out);
        continue;
      }
      if camera.projected_size(&node.bounds) < self.config.min_node_pixel_size {
        out.stats.too_small += 1;
        self.maybe_dispose(&node, out);
        continue;
      }

      let (kind, load, points, payload, created, children) = {
        let state = node.state();
        (
          state.kind,
          state.load,
          u64::from(state.point_count),
          state.payload.clone(),
          state.created,
          state.child_ids(),
        )
      };

      match (kind, load) {
        (NodeKind::Proxy, _) => {
          if let Some(hierarchy) = &self.hierarchy {
            if hierarchy.request(id) {
              out.stats.proxies_requested += 1;
            }
          }
        }
        (_, LoadState::Loaded) => {
          if let Some(payload) = payload {
            if points <= remaining {
              remaining -= points;
              self.cache.lock().touch(id, &*self.geometry);
              if !payload.is_empty() {
                out.stats.rendered += 1;
                out.render.push(RenderNode {
                  id,
                  name: node.name.clone(),
                  bounds: node.bounds,
                  point_count: points as u32,
                  payload,
                  created,
                });
              }
            }
          }
        }
        (_, LoadState::Unloaded) => {
          // loads beyond what could be rendered would only churn the cache
          if points <= remaining && self.loader.request(id) {
            out.stats.loads_requested += 1;
          }
        }
        (_, LoadState::Loading) => {}
      }

      for child in children {
        if let Some(child_node) = self.geometry.node(child) {
          heap.push(Candidate {
            priority: camera.projected_size(&child_node.bounds),
            id: child,
          });
        }
      }
    }
    out.stats.remaining_budget = remaining;
  }

  /// Drop the loaded subtree of a node that left the view, when deep enough.
  fn maybe_dispose(&self, node: &GeometryNode, out: &mut TraversalOutput) {
    if node.level() < self.config.dispose_depth_floor {
      return;
    }
    let mut stack = vec![node.id];
    let mut cache = self.cache.lock();
    while let Some(id) = stack.pop() {
      let Some(n) = self.geometry.node(id) else {
        continue;
      };
      out.stats.dispose_checked += 1;
      // Loading nodes finish first; their completion re-enters the cache
      if n.load_state() == LoadState::Loaded {
        cache.remove(id);
        if n.unload() {
          out.stats.disposed += 1;
          out.delete.push(id);
        }
      }
      for child in n.children() {
        let active = self
          .geometry
          .node(child)
          .is_some_and(|c| c.load_state() != LoadState::Unloaded);
        if active {
          stack.push(child);
        }
      }
    }
  }
}

#[cfg(test)]
#[path = "traversal_test.rs"]
mod traversal_test;
