//! Asynchronous payload loads with bounded concurrency.
//!
//! Loads run on rayon's pool and post their outcome on a channel; the
//! traversal thread drains completions, so node state and the cache are
//! only advanced from one place.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use web_time::Instant;

use super::geometry::OctreeGeometry;
use super::node::NodeId;
use crate::error::Result;
use crate::geometry::AttributeBuffers;

/// Finished load, successful or not.
#[derive(Debug)]
pub struct LoadCompletion {
  pub id: NodeId,
  pub outcome: Result<Arc<AttributeBuffers>>,
  pub elapsed_us: u64,
}

pub struct NodeLoader {
  geometry: Arc<OctreeGeometry>,
  max_in_flight: usize,
  in_flight: Arc<AtomicUsize>,
  sender: Sender<LoadCompletion>,
  receiver: Receiver<LoadCompletion>,
}

impl NodeLoader {
  pub fn new(geometry: Arc<OctreeGeometry>, max_in_flight: usize) -> Self {
    let (sender, receiver) = unbounded();
    Self {
      geometry,
      max_in_flight: max_in_flight.max(1),
      in_flight: Arc::new(AtomicUsize::new(0)),
      sender,
      receiver,
    }
  }

  /// Loads started but not yet finished.
  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::Acquire)
  }

  pub(crate) fn in_flight_counter(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.in_flight)
  }

  pub fn has_capacity(&self) -> bool {
    self.in_flight() < self.max_in_flight
  }

  /// Start loading `id` if a slot is free and the node is unloaded.
  pub fn request(&self, id: NodeId) -> bool {
    if !self.has_capacity() {
      return false;
    }
    let Some(node) = self.geometry.node(id) else {
      return false;
    };
    if !node.begin_load() {
      return false;
    }
    self.in_flight.fetch_add(1, Ordering::AcqRel);

    let geometry = Arc::clone(&self.geometry);
    let in_flight = Arc::clone(&self.in_flight);
    let sender = self.sender.clone();
    rayon::spawn(move || {
      let start = Instant::now();
      let outcome = geometry.read_payload(&node).map(Arc::new);
      let elapsed_us = start.elapsed().as_micros() as u64;
      // receiver gone means the session ended; the node stays Loading
      let _ = sender.send(LoadCompletion {
        id,
        outcome,
        elapsed_us,
      });
      // released after posting, whatever the outcome, so an idle loader
      // has nothing left to deliver
      in_flight.fetch_sub(1, Ordering::AcqRel);
    });
    true
  }

  /// Completions posted since the last drain.
  pub fn drain(&self) -> Vec<LoadCompletion> {
    self.receiver.try_iter().collect()
  }
}
