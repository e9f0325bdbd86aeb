//! Streaming session: the one object a front end holds.
//!
//! ```ignore
//! let mut session = StreamingSession::open("out/", StreamConfig::default())?;
//! session.start()?;
//! loop {
//!   session.set_camera(camera);
//!   if let Some(frame) = session.take_frame() {
//!     for id in &frame.delete { release(id) }
//!     for node in &frame.render {
//!       upload(node);
//!       session.mark_created(node.id);
//!     }
//!   }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use web_time::Instant;

use super::cache::LruCache;
use super::frame::{Frame, FrameExchange};
use super::geometry::OctreeGeometry;
use super::hierarchy_loader::HierarchyLoader;
use super::node::{LoadState, NodeId};
use super::traversal::{CameraState, IdleWatch, TraversalStats, Traverser};
use crate::config::StreamConfig;
use crate::error::{IoContext, Result};
use crate::io::{join_logged, StopSignal};
use crate::metrics::StreamMetrics;

/// Longest single sleep of the traversal thread between stop checks.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Upper bound for [`StreamingSession::tick`] waiting on background work.
const TICK_IDLE_TIMEOUT_MS: u64 = 10_000;

struct Shared {
  camera: Mutex<Option<CameraState>>,
  frames: FrameExchange,
  traverser: Mutex<Traverser>,
}

impl Shared {
  /// One pass with the latest camera. `None` until a camera is set.
  fn step(&self) -> Option<TraversalStats> {
    let camera = (*self.camera.lock())?;
    let mut traverser = self.traverser.lock();
    let out = traverser.pass(&camera);
    self.frames.publish(Frame {
      sequence: 0,
      render: out.render,
      delete: out.delete,
    });
    Some(out.stats)
  }
}

pub struct StreamingSession {
  geometry: Arc<OctreeGeometry>,
  config: StreamConfig,
  shared: Arc<Shared>,
  cache: Arc<Mutex<LruCache>>,
  idle: IdleWatch,
  metrics: Arc<Mutex<StreamMetrics>>,
  stop: StopSignal,
  handle: Option<JoinHandle<()>>,
}

impl StreamingSession {
  /// Open the octree in `dir` and prepare a session over it.
  pub fn open(dir: impl AsRef<Path>, config: StreamConfig) -> Result<Self> {
    let geometry = OctreeGeometry::open(dir)?;
    Self::new(Arc::new(geometry), config)
  }

  pub fn new(geometry: Arc<OctreeGeometry>, config: StreamConfig) -> Result<Self> {
    config.validate()?;
    let stop = StopSignal::new();
    let hierarchy = if geometry.is_paged() {
      Some(HierarchyLoader::spawn(Arc::clone(&geometry), stop.clone())?)
    } else {
      None
    };
    let metrics = Arc::new(Mutex::new(StreamMetrics::new()));
    let traverser = Traverser::new(
      Arc::clone(&geometry),
      config.clone(),
      hierarchy,
      Arc::clone(&metrics),
    );
    let cache = Arc::clone(traverser.cache());
    let idle = traverser.idle_watch();
    Ok(Self {
      geometry,
      config,
      cache,
      idle,
      shared: Arc::new(Shared {
        camera: Mutex::new(None),
        frames: FrameExchange::new(),
        traverser: Mutex::new(traverser),
      }),
      metrics,
      stop,
      handle: None,
    })
  }

  /// Spawn the traversal thread. A second call is a no-op.
  pub fn start(&mut self) -> Result<()> {
    if self.handle.is_some() {
      return Ok(());
    }
    let shared = Arc::clone(&self.shared);
    let stop = self.stop.clone();
    let interval = Duration::from_millis(self.config.traversal_interval_ms);
    let handle = std::thread::Builder::new()
      .name("octree-traversal".into())
      .spawn(move || {
        while !stop.is_stopped() {
          shared.step();
          let deadline = Instant::now() + interval;
          while !stop.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
              break;
            }
            std::thread::sleep((deadline - now).min(STOP_CHECK_INTERVAL));
          }
        }
      })
      .at_path(Path::new("octree-traversal"))?;
    self.handle = Some(handle);
    tracing::debug!(interval_ms = self.config.traversal_interval_ms, "traversal started");
    Ok(())
  }

  pub fn is_running(&self) -> bool {
    self.handle.is_some()
  }

  /// Camera used by the next pass.
  pub fn set_camera(&self, camera: CameraState) {
    *self.shared.camera.lock() = Some(camera);
  }

  /// Latest published frame, if the front end has not taken it yet.
  pub fn take_frame(&self) -> Option<Frame> {
    self.shared.frames.take()
  }

  /// Record that the front end holds GPU resources for `id`.
  pub fn mark_created(&self, id: NodeId) -> bool {
    let Some(node) = self.geometry.node(id) else {
      return false;
    };
    let mut state = node.state();
    if state.load != LoadState::Loaded {
      return false;
    }
    state.created = true;
    true
  }

  /// Run one pass on the calling thread, then wait for the loads and
  /// expansions it started. `None` when no camera is set.
  pub fn tick(&self) -> Option<TraversalStats> {
    let stats = self.shared.step()?;
    if !self.wait_background(TICK_IDLE_TIMEOUT_MS) {
      tracing::warn!("background loads still running after tick");
    }
    Some(stats)
  }

  /// Wait for outstanding loads and expansions without blocking passes.
  pub fn wait_background(&self, timeout_ms: u64) -> bool {
    self.idle.wait(timeout_ms)
  }

  /// Stop the traversal thread and background loaders. Idempotent.
  pub fn stop(&mut self) {
    self.stop.stop();
    if let Some(handle) = self.handle.take() {
      join_logged(handle, "traversal");
      tracing::debug!("traversal stopped");
    }
  }

  pub fn geometry(&self) -> &Arc<OctreeGeometry> {
    &self.geometry
  }

  pub fn config(&self) -> &StreamConfig {
    &self.config
  }

  /// Snapshot of the streaming statistics.
  pub fn metrics(&self) -> StreamMetrics {
    self.metrics.lock().clone()
  }

  /// Points currently held by the cache.
  pub fn resident_points(&self) -> u64 {
    self.cache.lock().resident_points()
  }
}

impl Drop for StreamingSession {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
