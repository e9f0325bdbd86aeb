//! Second pass: in-memory octree per chunk.
//!
//! Each split counts the node's points into a `tree_grid`³ Morton grid,
//! counting-sorts them so every pyramid cell is a contiguous range, and
//! walks the pyramid. Cells at the bottom of the grid that are still too
//! large start a fresh grid on their own points.

use std::path::Path;

use rayon::prelude::*;

use super::node::Node;
use super::pyramid::{Cell, CountPyramid};
use crate::config::BuildConfig;
use crate::constants::MAX_TREE_LEVEL;
use crate::error::{IoContext, OctreeError, Result};
use crate::geometry::{point, Aabb, Point};

/// Slack for containment checks relative to the node size.
pub(crate) const CONTAINMENT_TOLERANCE: f32 = 1e-5;

/// Containment tolerance in world units for `bounds`.
///
/// Nested cell bounds accumulate rounding proportional to the coordinate
/// magnitude, which dominates the relative term for deep nodes.
#[inline]
pub(crate) fn tolerance_for(bounds: &Aabb) -> f32 {
  let magnitude = bounds.min.abs().max(bounds.max.abs()).max_element();
  bounds.size().max_element() * CONTAINMENT_TOLERANCE + magnitude * f32::EPSILON * 8.0
}

/// Fail with a consistency error if any point lies outside `bounds`.
pub(crate) fn check_containment(name: &str, bounds: &Aabb, points: &[Point]) -> Result<()> {
  let tolerance = tolerance_for(bounds);
  match points
    .iter()
    .find(|p| !bounds.contains_point_approx(p.position, tolerance))
  {
    Some(p) => Err(OctreeError::Consistency(format!(
      "point {} routed to {name} lies outside its bounds {:?}..{:?}",
      p.position, bounds.min, bounds.max
    ))),
    None => Ok(()),
  }
}

/// Read a chunk file, checking it holds `expected` points.
pub fn load_chunk(path: &Path, expected: u64) -> Result<Vec<Point>> {
  let bytes = std::fs::read(path).at_path(path)?;
  let points = point::decode_points(&bytes)?;
  if points.len() as u64 != expected {
    return Err(OctreeError::Consistency(format!(
      "{} holds {} points, chunk pass counted {expected}",
      path.display(),
      points.len()
    )));
  }
  Ok(points)
}

/// Build the subtree of one chunk.
#[tracing::instrument(skip_all, name = "build::index", fields(chunk = %name, points = points.len()))]
pub fn index_chunk(
  name: String,
  bounds: Aabb,
  points: Vec<Point>,
  config: &BuildConfig,
) -> Result<Node> {
  check_containment(&name, &bounds, &points)?;
  let indexer = Indexer {
    max_node_size: config.max_node_size as usize,
    grid: config.tree_grid_size().max(2),
  };
  let node = indexer.build(name, bounds, points)?;
  tracing::debug!(nodes = node.node_count(), "indexed chunk");
  Ok(node)
}

struct Indexer {
  max_node_size: usize,
  grid: u32,
}

/// Points of one node counting-sorted by fine Morton cell.
struct SortedCells {
  pyramid: CountPyramid,
  /// `offsets[c]..offsets[c + 1]` holds the points of fine cell `c`.
  offsets: Vec<usize>,
  points: Vec<Point>,
}

impl SortedCells {
  fn new(bounds: &Aabb, grid: u32, points: Vec<Point>) -> Result<Self> {
    let cells = (grid as usize).pow(3);
    let codes: Vec<u32> = points
      .par_iter()
      .map(|p| bounds.morton_cell_of(p.position, grid) as u32)
      .collect();

    let mut counts = vec![0u64; cells];
    for &code in &codes {
      counts[code as usize] += 1;
    }
    let mut offsets = Vec::with_capacity(cells + 1);
    let mut running = 0usize;
    offsets.push(0);
    for &c in &counts {
      running += c as usize;
      offsets.push(running);
    }

    let pyramid = CountPyramid::from_fine(counts);
    if pyramid.total() != points.len() as u64 {
      return Err(OctreeError::Consistency(format!(
        "bucket counts sum to {} for {} points",
        pyramid.total(),
        points.len()
      )));
    }

    // stable scatter
    let mut cursor = offsets[..cells].to_vec();
    let mut sorted = vec![Point::default(); points.len()];
    for (p, &code) in points.iter().zip(&codes) {
      let slot = &mut cursor[code as usize];
      sorted[*slot] = *p;
      *slot += 1;
    }

    Ok(Self {
      pyramid,
      offsets,
      points: sorted,
    })
  }

  fn points_of(&self, cell: Cell) -> Vec<Point> {
    let range = cell.fine_range(self.pyramid.finest_level());
    self.points[self.offsets[range.start as usize]..self.offsets[range.end as usize]].to_vec()
  }
}

impl Indexer {
  fn build(&self, name: String, bounds: Aabb, points: Vec<Point>) -> Result<Node> {
    if name.len() > MAX_TREE_LEVEL + 1 {
      return Err(super::node::too_deep(&name));
    }
    if points.len() <= self.max_node_size || name.len() == MAX_TREE_LEVEL + 1 {
      return Ok(Node::leaf(name, bounds, points));
    }
    let sorted = SortedCells::new(&bounds, self.grid, points)?;
    self.split(&sorted, Cell::ROOT, name, bounds)
  }

  /// Materialize `cell` as an inner node and recurse into its children.
  /// Depth is bounded by the grid levels, with `build` starting a new grid.
  fn split(&self, sorted: &SortedCells, cell: Cell, name: String, bounds: Aabb) -> Result<Node> {
    let finest = sorted.pyramid.finest_level();
    let mut node = Node::inner(name, bounds);
    for octant in 0..8u8 {
      let child_cell = cell.child(octant);
      let count = sorted.pyramid.count(child_cell);
      if count == 0 {
        continue;
      }
      let child_name = node.child_name(octant);
      let child_bounds = bounds.child(octant);
      let at_limit = child_name.len() == MAX_TREE_LEVEL + 1;
      let child = if count as usize <= self.max_node_size || at_limit {
        Node::leaf(child_name, child_bounds, sorted.points_of(child_cell))
      } else if child_cell.level == finest {
        self.build(child_name, child_bounds, sorted.points_of(child_cell))?
      } else {
        self.split(sorted, child_cell, child_name, child_bounds)?
      };
      node.attach(octant, child)?;
    }
    Ok(node)
  }
}
