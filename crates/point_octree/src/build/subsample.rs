//! Spatial-hash thinning of child point sets into their parent.
//!
//! The node's box is cut into a fixed `grid`³ voxel grid. A candidate is
//! accepted when its voxel is empty, or when it lies farther than
//! `radius_factor × half voxel diagonal` from the last point accepted in
//! that voxel. Accepted points move to the parent, rejected points stay
//! with the child.
//!
//! The voxel table is allocated once and cleared through a touched list,
//! so cost per node is proportional to its candidates. Output depends on
//! candidate order (children in octant order, points in stored order).

use super::indexer::check_containment;
use super::node::{too_deep, Node};
use crate::config::BuildConfig;
use crate::constants::MAX_TREE_LEVEL;
use crate::error::{OctreeError, Result};
use crate::geometry::Aabb;

pub struct Subsampler {
  grid: u32,
  radius_factor: f32,
  /// Per voxel: index + 1 of the last accepted point, 0 when empty.
  cells: Vec<u32>,
  touched: Vec<usize>,
  next_seq: u64,
}

impl Subsampler {
  pub fn new(grid: u32, radius_factor: f32) -> Self {
    let grid = grid.max(1);
    Self {
      grid,
      radius_factor,
      cells: vec![0; (grid as usize).pow(3)],
      touched: Vec::new(),
      next_seq: 0,
    }
  }

  pub fn from_config(config: &BuildConfig) -> Self {
    Self::new(config.subsample_grid, config.subsample_radius_factor)
  }

  /// Nodes processed so far.
  pub fn processed(&self) -> u64 {
    self.next_seq
  }

  #[inline]
  fn cell_index(&self, bounds: &Aabb, position: glam::Vec3) -> usize {
    let c = bounds.cell_of(position, self.grid);
    let g = self.grid as usize;
    c.x as usize + g * (c.y as usize + g * c.z as usize)
  }

  fn mark(&mut self, node: &mut Node) {
    node.subsampled = true;
    node.subsample_seq = Some(self.next_seq);
    self.next_seq += 1;
  }

  /// Thin the children of `node` into it. Every child must already be
  /// subsampled and hold its point set. Leaves are only marked.
  pub fn subsample_node(&mut self, node: &mut Node) -> Result<()> {
    if node.subsampled {
      return Err(OctreeError::Consistency(format!(
        "{} subsampled twice",
        node.name
      )));
    }
    if let Some((_, child)) = node.children().find(|(_, c)| !c.subsampled) {
      return Err(OctreeError::Consistency(format!(
        "{} subsampled before its child {}",
        node.name, child.name
      )));
    }
    if node.is_leaf() {
      self.mark(node);
      return Ok(());
    }

    let bounds = node.bounds;
    let voxel = bounds.size() / self.grid as f32;
    let radius = self.radius_factor * voxel.length() * 0.5;
    let radius_sq = radius * radius;

    let mut accepted = node.points.take().unwrap_or_default();
    for i in 0..accepted.len() {
      let cell = self.cell_index(&bounds, accepted[i].position);
      if self.cells[cell] == 0 {
        self.touched.push(cell);
      }
      self.cells[cell] = i as u32 + 1;
    }

    let mut candidates = 0usize;
    for child in node.children.iter_mut().flatten() {
      let Some(points) = child.points.take() else {
        return Err(OctreeError::Consistency(format!(
          "{} was flushed before its parent {} was subsampled",
          child.name, node.name
        )));
      };
      check_containment(&child.name, &child.bounds, &points)?;
      candidates += points.len();

      let mut rejected = Vec::with_capacity(points.len());
      for p in points {
        let cell = self.cell_index(&bounds, p.position);
        let last = self.cells[cell];
        let accept = last == 0
          || accepted[(last - 1) as usize]
            .position
            .distance_squared(p.position)
            > radius_sq;
        if accept {
          if last == 0 {
            self.touched.push(cell);
          }
          accepted.push(p);
          self.cells[cell] = accepted.len() as u32;
        } else {
          rejected.push(p);
        }
      }
      child.set_points(rejected);
    }

    for cell in self.touched.drain(..) {
      self.cells[cell] = 0;
    }
    tracing::trace!(
      node = %node.name,
      candidates,
      accepted = accepted.len(),
      "subsampled"
    );
    node.set_points(accepted);
    self.mark(node);
    Ok(())
  }

  /// Subsample every unprocessed node of the subtree in post-order.
  ///
  /// Once a node is processed the point sets of its children are final and
  /// each child is handed to `on_final`. Already subsampled nodes (grafted
  /// chunk roots) are not descended into. Recursion is bounded by the
  /// tree level limit.
  pub fn subsample_tree(
    &mut self,
    node: &mut Node,
    on_final: &mut dyn FnMut(&mut Node) -> Result<()>,
  ) -> Result<()> {
    if node.subsampled {
      return Ok(());
    }
    if node.level() > MAX_TREE_LEVEL {
      return Err(too_deep(&node.name));
    }
    for child in node.children.iter_mut().flatten() {
      self.subsample_tree(child, on_final)?;
    }
    self.subsample_node(node)?;
    for child in node.children.iter_mut().flatten() {
      on_final(child)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use glam::Vec3;

  use super::*;
  use crate::geometry::Point;
  use crate::test_utils::uniform_cube;

  fn unit() -> Aabb {
    Aabb::new(Vec3::ZERO, Vec3::ONE)
  }

  /// Root with one leaf per octant, each filled with uniform points.
  fn two_level(points_per_child: usize) -> Node {
    let mut root = Node::inner("r".into(), unit());
    for octant in 0..8u8 {
      let bounds = unit().child(octant);
      let points = uniform_cube(points_per_child, 0.5, octant as u64)
        .into_iter()
        .map(|p| Point::new(p.position + bounds.min, p.color))
        .collect();
      root
        .attach(octant, Node::leaf(format!("r{octant}"), bounds, points))
        .unwrap();
    }
    root
  }

  #[test]
  fn points_move_up_without_loss() {
    let mut root = two_level(500);
    let mut sampler = Subsampler::new(8, 0.7);
    sampler.subsample_tree(&mut root, &mut |_| Ok(())).unwrap();
    assert_eq!(root.total_points(), 4000);
    assert!(root.point_count > 0);
    // at most a few points per voxel reach the root
    assert!(root.point_count < 4000, "root kept {}", root.point_count);
    for (_, child) in root.children() {
      assert_eq!(child.points.as_ref().unwrap().len(), child.point_count as usize);
    }
  }

  #[test]
  fn empty_voxel_always_accepts() {
    let mut root = two_level(1);
    let mut sampler = Subsampler::new(8, 0.7);
    sampler.subsample_tree(&mut root, &mut |_| Ok(())).unwrap();
    assert_eq!(root.point_count, 8);
    assert!(root.children().all(|(_, c)| c.point_count == 0));
  }

  #[test]
  fn close_points_in_one_voxel_are_rejected() {
    let mut root = Node::inner("r".into(), unit());
    let p = Vec3::splat(0.1);
    let points = vec![
      Point::new(p, [0; 3]),
      Point::new(p + Vec3::splat(0.001), [0; 3]),
      Point::new(p + Vec3::splat(0.002), [0; 3]),
    ];
    root.attach(0, Node::leaf("r0".into(), unit().child(0), points)).unwrap();
    let mut sampler = Subsampler::new(2, 0.7);
    sampler.subsample_tree(&mut root, &mut |_| Ok(())).unwrap();
    assert_eq!(root.point_count, 1);
    assert_eq!(root.children[0].as_ref().unwrap().point_count, 2);
  }

  #[test]
  fn children_are_processed_first() {
    let mut root = two_level(50);
    root
      .children[2]
      .as_mut()
      .unwrap()
      .attach(5, Node::leaf("r25".into(), unit().child(2).child(5), Vec::new()))
      .unwrap();
    let mut sampler = Subsampler::new(8, 0.7);
    let mut finalized = Vec::new();
    sampler
      .subsample_tree(&mut root, &mut |n| {
        finalized.push(n.name.clone());
        Ok(())
      })
      .unwrap();

    fn check(node: &Node) {
      let seq = node.subsample_seq.unwrap();
      for (_, child) in node.children() {
        assert!(child.subsample_seq.unwrap() < seq, "{} before {}", node.name, child.name);
        check(child);
      }
    }
    check(&root);
    assert_eq!(sampler.processed(), 10);
    assert_eq!(finalized.len(), 9);
    assert!(!finalized.contains(&"r".to_string()));
  }

  #[test]
  fn unsubsampled_child_is_rejected() {
    let mut root = two_level(5);
    let mut sampler = Subsampler::new(8, 0.7);
    let err = sampler.subsample_node(&mut root).unwrap_err();
    assert!(err.is_consistency());
  }

  #[test]
  fn misrouted_point_fails_loudly() {
    let mut root = Node::inner("r".into(), unit());
    let stray = vec![Point::new(Vec3::splat(0.9), [0; 3])];
    root.attach(0, Node::leaf("r0".into(), unit().child(0), stray)).unwrap();
    let mut sampler = Subsampler::new(8, 0.7);
    let err = sampler.subsample_tree(&mut root, &mut |_| Ok(())).unwrap_err();
    assert!(err.is_consistency(), "{err}");
  }
}
