//! Background expansion of proxy nodes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::geometry::OctreeGeometry;
use super::node::NodeId;
use crate::error::{IoContext, Result};
use crate::io::{join_logged, StopSignal, POLL_INTERVAL};

/// Dedicated thread reading hierarchy chunks for requested proxies.
pub struct HierarchyLoader {
  sender: Option<Sender<NodeId>>,
  pending: Arc<Mutex<HashSet<NodeId>>>,
  expanded: Arc<AtomicU64>,
  handle: Option<JoinHandle<()>>,
}

impl HierarchyLoader {
  pub fn spawn(geometry: Arc<OctreeGeometry>, stop: StopSignal) -> Result<Self> {
    let (sender, receiver) = unbounded::<NodeId>();
    let pending = Arc::new(Mutex::new(HashSet::new()));
    let worker_pending = Arc::clone(&pending);
    let expanded = Arc::new(AtomicU64::new(0));
    let worker_expanded = Arc::clone(&expanded);
    let handle = std::thread::Builder::new()
      .name("hierarchy-loader".into())
      .spawn(move || loop {
        if stop.is_stopped() {
          return;
        }
        match receiver.recv_timeout(POLL_INTERVAL * 10) {
          Ok(id) => {
            match geometry.expand_proxy(id) {
              Ok(0) => {}
              Ok(_) => {
                worker_expanded.fetch_add(1, Ordering::Relaxed);
              }
              // node stays a proxy and is requested again by a later pass
              Err(e) => tracing::warn!(node = ?id, error = %e, "proxy expansion failed"),
            }
            worker_pending.lock().remove(&id);
          }
          Err(RecvTimeoutError::Timeout) => {}
          Err(RecvTimeoutError::Disconnected) => return,
        }
      })
      .at_path(std::path::Path::new("hierarchy-loader"))?;
    Ok(Self {
      sender: Some(sender),
      pending,
      expanded,
      handle: Some(handle),
    })
  }

  /// Queue `id` for expansion. False when already queued.
  pub fn request(&self, id: NodeId) -> bool {
    if !self.pending.lock().insert(id) {
      return false;
    }
    match &self.sender {
      Some(sender) if sender.send(id).is_ok() => true,
      _ => {
        self.pending.lock().remove(&id);
        false
      }
    }
  }

  pub(crate) fn pending_set(&self) -> Arc<Mutex<HashSet<NodeId>>> {
    Arc::clone(&self.pending)
  }

  pub fn pending_count(&self) -> usize {
    self.pending.lock().len()
  }

  /// Proxies expanded so far.
  pub fn expanded(&self) -> u64 {
    self.expanded.load(Ordering::Relaxed)
  }

  /// Close the queue and join the thread. Requests not yet taken are dropped.
  pub fn shutdown(&mut self) {
    drop(self.sender.take());
    if let Some(handle) = self.handle.take() {
      join_logged(handle, "hierarchy loader");
    }
  }
}

impl Drop for HierarchyLoader {
  fn drop(&mut self) {
    self.shutdown();
  }
}
