//! Double-buffered hand-off of traversal results to the front end.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::node::NodeId;
use crate::geometry::{Aabb, AttributeBuffers};

/// One node selected for drawing.
#[derive(Clone, Debug)]
pub struct RenderNode {
  pub id: NodeId,
  pub name: String,
  pub bounds: Aabb,
  pub point_count: u32,
  pub payload: Arc<AttributeBuffers>,
  /// Front end already holds GPU resources for this node.
  pub created: bool,
}

/// Complete decisions of one traversal pass.
#[derive(Clone, Debug, Default)]
pub struct Frame {
  pub sequence: u64,
  pub render: Vec<RenderNode>,
  /// Nodes whose payload was dropped; release their GPU resources.
  pub delete: Vec<NodeId>,
}

/// Latest published frame, swapped in and out under one lock.
#[derive(Debug, Default)]
pub struct FrameExchange {
  slot: Mutex<Option<Frame>>,
  published: Mutex<u64>,
}

impl FrameExchange {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the pending frame. Deletions of a frame nobody took are carried
  /// over, unless the new frame renders that node again.
  pub fn publish(&self, mut frame: Frame) -> u64 {
    let sequence = {
      let mut published = self.published.lock();
      *published += 1;
      *published
    };
    frame.sequence = sequence;

    let mut slot = self.slot.lock();
    if let Some(stale) = slot.take() {
      let rendered: HashSet<NodeId> = frame.render.iter().map(|n| n.id).collect();
      let mut seen: HashSet<NodeId> = frame.delete.iter().copied().collect();
      for id in stale.delete {
        if !rendered.contains(&id) && seen.insert(id) {
          frame.delete.push(id);
        }
      }
    }
    *slot = Some(frame);
    sequence
  }

  /// Take the pending frame, leaving the slot empty.
  pub fn take(&self) -> Option<Frame> {
    self.slot.lock().take()
  }

  pub fn has_pending(&self) -> bool {
    self.slot.lock().is_some()
  }

  /// Frames published so far.
  pub fn published(&self) -> u64 {
    *self.published.lock()
  }
}

#[cfg(test)]
mod tests {
  use glam::Vec3;

  use super::*;

  fn render(id: u32) -> RenderNode {
    RenderNode {
      id: NodeId(id),
      name: format!("r{id}"),
      bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
      point_count: 0,
      payload: Arc::new(AttributeBuffers::default()),
      created: false,
    }
  }

  #[test]
  fn test_take_empties_slot() {
    let exchange = FrameExchange::new();
    assert!(exchange.take().is_none());
    exchange.publish(Frame {
      render: vec![render(1)],
      ..Frame::default()
    });
    let frame = exchange.take().unwrap();
    assert_eq!(frame.sequence, 1);
    assert_eq!(frame.render.len(), 1);
    assert!(!exchange.has_pending());
  }

  #[test]
  fn test_unconsumed_deletes_carry_over() {
    let exchange = FrameExchange::new();
    exchange.publish(Frame {
      delete: vec![NodeId(3), NodeId(4)],
      ..Frame::default()
    });
    exchange.publish(Frame {
      render: vec![render(4)],
      delete: vec![NodeId(5), NodeId(3)],
      ..Frame::default()
    });
    let frame = exchange.take().unwrap();
    assert_eq!(frame.sequence, 2);
    // 3 not duplicated, 4 is rendered again
    assert_eq!(frame.delete, vec![NodeId(5), NodeId(3)]);
  }

  #[test]
  fn test_consumed_frame_not_merged() {
    let exchange = FrameExchange::new();
    exchange.publish(Frame {
      delete: vec![NodeId(7)],
      ..Frame::default()
    });
    exchange.take();
    exchange.publish(Frame::default());
    assert!(exchange.take().unwrap().delete.is_empty());
    assert_eq!(exchange.published(), 2);
  }
}
