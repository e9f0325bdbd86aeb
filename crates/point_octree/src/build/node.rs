//! Build-time octree node.

use crate::constants::MAX_TREE_LEVEL;
use crate::error::{OctreeError, Result};
use crate::geometry::{Aabb, Point};

/// Node of the tree under construction.
///
/// `points` is `Some` while the node's point set is resident and `None`
/// once it has been flushed to the payload file. `point_count` stays valid
/// either way.
#[derive(Debug, Default)]
pub struct Node {
  /// Octant-digit path from the root, e.g. `"r052"`.
  pub name: String,
  pub bounds: Aabb,
  pub points: Option<Vec<Point>>,
  pub point_count: u32,
  /// Nodes in the subtree below this one.
  pub descendant_count: u32,
  pub children: [Option<Box<Node>>; 8],
  /// Payload offset, set when flushed.
  pub file_offset: Option<u64>,
  pub subsampled: bool,
  /// Order in which the node was subsampled.
  pub subsample_seq: Option<u64>,
}

impl Node {
  /// Node without points.
  pub fn inner(name: String, bounds: Aabb) -> Self {
    Self {
      name,
      bounds,
      points: Some(Vec::new()),
      ..Default::default()
    }
  }

  pub fn leaf(name: String, bounds: Aabb, points: Vec<Point>) -> Self {
    Self {
      name,
      bounds,
      point_count: points.len() as u32,
      points: Some(points),
      ..Default::default()
    }
  }

  /// Depth below the root (`"r"` is 0).
  #[inline]
  pub fn level(&self) -> usize {
    self.name.len().saturating_sub(1)
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.children.iter().all(Option::is_none)
  }

  pub fn child_name(&self, octant: u8) -> String {
    format!("{}{}", self.name, octant)
  }

  /// Existing child at `octant`, or a new empty inner child.
  pub fn child_or_insert(&mut self, octant: u8) -> &mut Node {
    let name = self.child_name(octant);
    let bounds = self.bounds.child(octant);
    self.children[octant as usize].get_or_insert_with(|| Box::new(Node::inner(name, bounds)))
  }

  /// Attach `child` at `octant`. Occupied slots are a consistency error.
  pub fn attach(&mut self, octant: u8, child: Node) -> Result<()> {
    let slot = &mut self.children[octant as usize];
    if slot.is_some() {
      return Err(OctreeError::Consistency(format!(
        "{} already has a child at octant {octant}",
        self.name
      )));
    }
    *slot = Some(Box::new(child));
    Ok(())
  }

  pub fn children(&self) -> impl DoubleEndedIterator<Item = (u8, &Node)> {
    self
      .children
      .iter()
      .enumerate()
      .filter_map(|(i, c)| c.as_deref().map(|c| (i as u8, c)))
  }

  /// Set `points`, keeping `point_count` in sync.
  pub fn set_points(&mut self, points: Vec<Point>) {
    self.point_count = points.len() as u32;
    self.points = Some(points);
  }

  /// Recompute descendant counts for the whole subtree and return the
  /// number of nodes in it.
  ///
  /// Recursion is bounded by the tree level limit.
  pub fn refresh_descendant_counts(&mut self) -> u32 {
    let mut descendants = 0;
    for child in self.children.iter_mut().flatten() {
      descendants += child.refresh_descendant_counts();
    }
    self.descendant_count = descendants;
    descendants + 1
  }

  /// Nodes in this subtree, including self.
  pub fn node_count(&self) -> usize {
    1 + self.children().map(|(_, c)| c.node_count()).sum::<usize>()
  }

  /// Sum of `point_count` over the subtree.
  pub fn total_points(&self) -> u64 {
    self.point_count as u64 + self.children().map(|(_, c)| c.total_points()).sum::<u64>()
  }

  /// Deepest level in the subtree.
  pub fn max_level(&self) -> usize {
    self
      .children()
      .map(|(_, c)| c.max_level())
      .max()
      .unwrap_or_else(|| self.level())
  }
}

/// Error for trees deeper than the level limit.
pub(crate) fn too_deep(name: &str) -> OctreeError {
  OctreeError::Consistency(format!(
    "node {name} exceeds the maximum tree level {MAX_TREE_LEVEL}"
  ))
}

#[cfg(test)]
mod tests {
  use glam::Vec3;

  use super::*;

  fn unit() -> Aabb {
    Aabb::new(Vec3::ZERO, Vec3::ONE)
  }

  #[test]
  fn descendant_counts_cover_subtrees() {
    let mut root = Node::inner("r".into(), unit());
    root.child_or_insert(0).child_or_insert(7);
    root.child_or_insert(3);
    assert_eq!(root.refresh_descendant_counts(), 4);
    assert_eq!(root.descendant_count, 3);
    assert_eq!(root.children[0].as_ref().unwrap().descendant_count, 1);
    assert_eq!(root.node_count(), 4);
    assert_eq!(root.max_level(), 2);
  }

  #[test]
  fn inserted_children_follow_octant_bounds() {
    let mut root = Node::inner("r".into(), unit());
    let child = root.child_or_insert(4);
    assert_eq!(child.name, "r4");
    assert_eq!(child.bounds.min, Vec3::new(0.5, 0.0, 0.0));
  }

  #[test]
  fn attach_rejects_occupied_slot() {
    let mut root = Node::inner("r".into(), unit());
    root.attach(1, Node::inner("r1".into(), unit().child(1))).unwrap();
    let err = root.attach(1, Node::inner("r1".into(), unit().child(1))).unwrap_err();
    assert!(err.is_consistency());
  }

  #[test]
  fn leaf_tracks_point_count() {
    let points = vec![Point::new(Vec3::splat(0.5), [1, 2, 3]); 3];
    let mut node = Node::leaf("r".into(), unit(), points);
    assert_eq!(node.point_count, 3);
    node.set_points(Vec::new());
    assert_eq!(node.point_count, 0);
    assert!(node.is_leaf());
  }
}
