//! Axis-aligned bounding box with Morton-ordered subdivision.

use glam::{UVec3, Vec3};

use super::morton;

/// Single-precision axis-aligned bounding box.
///
/// Both corners are inclusive. Subdivision cells are addressed by Morton
/// code, matching the routing used by the chunker and indexer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
  /// Minimum corner (inclusive).
  pub min: Vec3,
  /// Maximum corner (inclusive).
  pub max: Vec3,
}

impl Aabb {
  /// Create a new AABB from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: Vec3, max: Vec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "AABB min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Inverted box, ready for [`Aabb::expand`].
  pub fn empty() -> Self {
    Self {
      min: Vec3::splat(f32::INFINITY),
      max: Vec3::splat(f32::NEG_INFINITY),
    }
  }

  /// Tight bounds of a set of positions, `None` when empty.
  pub fn from_positions(positions: impl IntoIterator<Item = Vec3>) -> Option<Self> {
    let mut bounds = Self::empty();
    for p in positions {
      bounds.expand(p);
    }
    (!bounds.is_empty()).then_some(bounds)
  }

  /// True for the inverted box returned by [`Aabb::empty`].
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
  }

  /// Grow to include a point.
  #[inline]
  pub fn expand(&mut self, p: Vec3) {
    self.min = self.min.min(p);
    self.max = self.max.max(p);
  }

  /// Grow to include another box.
  #[inline]
  pub fn merge(&mut self, other: &Aabb) {
    self.min = self.min.min(other.min);
    self.max = self.max.max(other.max);
  }

  /// Cube sharing `min`, with the longest edge on every axis.
  ///
  /// Octree cells of a cubic root stay cubic, which keeps projected sizes
  /// and subsampling radii isotropic.
  pub fn cubic(&self) -> Self {
    let edge = self.size().max_element().max(f32::MIN_POSITIVE);
    Self {
      min: self.min,
      max: self.min + Vec3::splat(edge),
    }
  }

  /// Check if this AABB contains a point.
  #[inline]
  pub fn contains_point(&self, point: Vec3) -> bool {
    point.x >= self.min.x
      && point.x <= self.max.x
      && point.y >= self.min.y
      && point.y <= self.max.y
      && point.z >= self.min.z
      && point.z <= self.max.z
  }

  /// Containment with `tolerance` world units of slack on every face.
  #[inline]
  pub fn contains_point_approx(&self, point: Vec3, tolerance: f32) -> bool {
    let slack = Vec3::splat(tolerance);
    let lo = self.min - slack;
    let hi = self.max + slack;
    point.cmpge(lo).all() && point.cmple(hi).all()
  }

  /// Check if this AABB overlaps with another (boundaries count).
  #[inline]
  pub fn overlaps(&self, other: &Aabb) -> bool {
    self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
  }

  /// Get the size of the AABB (max - min).
  #[inline]
  pub fn size(&self) -> Vec3 {
    self.max - self.min
  }

  /// Get the center of the AABB.
  #[inline]
  pub fn center(&self) -> Vec3 {
    (self.min + self.max) * 0.5
  }

  /// Radius of the bounding sphere.
  #[inline]
  pub fn half_diagonal(&self) -> f32 {
    self.size().length() * 0.5
  }

  /// Bounds of one octant (bit2 = X high, bit1 = Y high, bit0 = Z high).
  #[inline]
  pub fn child(&self, octant: u8) -> Self {
    debug_assert!(octant < 8, "octant out of range: {octant}");
    let (x, y, z) = morton::decode(octant as u64);
    self.cell_bounds(UVec3::new(x, y, z), 2)
  }

  /// Bounds reached by following octant digits down from this box.
  pub fn descend(&self, octants: impl IntoIterator<Item = u8>) -> Self {
    octants.into_iter().fold(*self, |bounds, octant| bounds.child(octant))
  }

  /// Octant of `point`, higher cell on ties.
  #[inline]
  pub fn octant_of(&self, point: Vec3) -> u8 {
    self.morton_cell_of(point, 2) as u8
  }

  /// Grid cell of `point` in a `grid`³ uniform subdivision.
  ///
  /// Boundary points go to the higher cell; points on the max face clamp to
  /// `grid - 1`. Points outside the box clamp to the nearest cell, callers
  /// validate containment separately.
  #[inline]
  pub fn cell_of(&self, point: Vec3, grid: u32) -> UVec3 {
    let size = self.size();
    let g = grid as f32;
    let axis = |p: f32, min: f32, extent: f32| -> u32 {
      if extent <= 0.0 {
        return 0;
      }
      let n = ((p - min) / extent * g).floor();
      if n <= 0.0 {
        0
      } else {
        (n as u32).min(grid - 1)
      }
    };
    UVec3::new(
      axis(point.x, self.min.x, size.x),
      axis(point.y, self.min.y, size.y),
      axis(point.z, self.min.z, size.z),
    )
  }

  /// Morton code of the cell of `point` in a `grid`³ subdivision.
  #[inline]
  pub fn morton_cell_of(&self, point: Vec3, grid: u32) -> u64 {
    let c = self.cell_of(point, grid);
    morton::encode(c.x, c.y, c.z)
  }

  /// Bounds of one cell of a `grid`³ subdivision.
  pub fn cell_bounds(&self, cell: UVec3, grid: u32) -> Self {
    let size = self.size();
    let g = grid as f32;
    let lo = |i: u32, min: f32, extent: f32| min + extent * (i as f32 / g);
    let hi = |i: u32, min: f32, max: f32, extent: f32| {
      if i + 1 >= grid {
        max
      } else {
        min + extent * ((i + 1) as f32 / g)
      }
    };
    Self {
      min: Vec3::new(
        lo(cell.x, self.min.x, size.x),
        lo(cell.y, self.min.y, size.y),
        lo(cell.z, self.min.z, size.z),
      ),
      max: Vec3::new(
        hi(cell.x, self.min.x, self.max.x, size.x),
        hi(cell.y, self.min.y, self.max.y, size.y),
        hi(cell.z, self.min.z, self.max.z, size.z),
      ),
    }
  }

  /// Split into `k`³ boxes indexed by Morton code.
  ///
  /// # Panics
  /// Debug-asserts that `k` is a power of two (Morton codes are dense only then).
  pub fn subdivide(&self, k: u32) -> Vec<Self> {
    debug_assert!(k.is_power_of_two(), "subdivision must be a power of two");
    let count = (k as usize).pow(3);
    (0..count as u64)
      .map(|code| {
        let (x, y, z) = morton::decode(code);
        self.cell_bounds(UVec3::new(x, y, z), k)
      })
      .collect()
  }
}

#[cfg(test)]
#[path = "aabb_test.rs"]
mod aabb_test;
