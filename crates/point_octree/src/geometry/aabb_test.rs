use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn unit() -> Aabb {
  Aabb::new(Vec3::ZERO, Vec3::ONE)
}

#[test]
fn test_contains_point_inclusive() {
  let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(10.0));
  assert!(aabb.contains_point(Vec3::splat(5.0)));
  assert!(aabb.contains_point(Vec3::ZERO));
  assert!(aabb.contains_point(Vec3::splat(10.0)));
  assert!(!aabb.contains_point(Vec3::splat(-1.0)));
  assert!(!aabb.contains_point(Vec3::new(5.0, 5.0, 10.1)));
}

#[test]
fn test_empty_and_expand() {
  let mut aabb = Aabb::empty();
  assert!(aabb.is_empty());
  aabb.expand(Vec3::new(1.0, 2.0, 3.0));
  aabb.expand(Vec3::new(-1.0, 0.0, 5.0));
  assert!(!aabb.is_empty());
  assert_eq!(aabb.min, Vec3::new(-1.0, 0.0, 3.0));
  assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 5.0));
}

#[test]
fn test_from_positions_empty_is_none() {
  assert!(Aabb::from_positions(std::iter::empty()).is_none());
}

#[test]
fn test_cubic_uses_longest_edge() {
  let aabb = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 4.0, 2.0)).cubic();
  assert_eq!(aabb.size(), Vec3::splat(4.0));
  assert_eq!(aabb.min, Vec3::ZERO);
}

/// Octant bit pattern: bit2 = X high, bit1 = Y high, bit0 = Z high.
#[test]
fn test_child_octant_pattern() {
  let aabb = unit();
  assert_eq!(aabb.child(0), Aabb::new(Vec3::ZERO, Vec3::splat(0.5)));
  assert_eq!(aabb.child(0b100).min, Vec3::new(0.5, 0.0, 0.0));
  assert_eq!(aabb.child(0b010).min, Vec3::new(0.0, 0.5, 0.0));
  assert_eq!(aabb.child(0b001).min, Vec3::new(0.0, 0.0, 0.5));
  assert_eq!(aabb.child(7), Aabb::new(Vec3::splat(0.5), Vec3::ONE));
}

#[test]
fn test_octant_of_matches_child() {
  let aabb = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
  for octant in 0..8u8 {
    let center = aabb.child(octant).center();
    assert_eq!(aabb.octant_of(center), octant);
  }
}

/// Points exactly on a split plane belong to the higher cell.
#[test]
fn test_boundary_goes_to_higher_cell() {
  let aabb = unit();
  assert_eq!(aabb.cell_of(Vec3::splat(0.5), 2), UVec3::ONE);
  assert_eq!(aabb.cell_of(Vec3::new(0.25, 0.0, 0.75), 4), UVec3::new(1, 0, 3));
}

/// The max face clamps into the last cell instead of overflowing.
#[test]
fn test_max_face_clamps_to_last_cell() {
  let aabb = unit();
  assert_eq!(aabb.cell_of(Vec3::ONE, 16), UVec3::splat(15));
}

#[test]
fn test_subdivide_count_and_morton_order() {
  let aabb = unit();
  let cells = aabb.subdivide(4);
  assert_eq!(cells.len(), 64);
  // code 0b111 is cell (1,1,1) of the first 2x2x2 block
  assert_eq!(cells[7].min, Vec3::splat(0.25));
  // the first 8 cells tile octant 0 of the parent
  let mut block = cells[0];
  for cell in &cells[1..8] {
    block.merge(cell);
  }
  assert_eq!(block, aabb.child(0));
}

#[test]
fn test_descend_follows_octants() {
  let aabb = unit();
  let b = aabb.descend([7u8, 0]);
  assert_eq!(b, Aabb::new(Vec3::splat(0.5), Vec3::splat(0.75)));
}

/// Property: the routed cell's bounds contain the point.
#[test]
fn test_routing_cell_contains_point() {
  let mut rng = StdRng::seed_from_u64(0xB0C5);
  for _ in 0..200 {
    let min = Vec3::new(
      rng.random_range(-1000.0..1000.0),
      rng.random_range(-1000.0..1000.0),
      rng.random_range(-1000.0..1000.0),
    );
    let size = Vec3::new(
      rng.random_range(0.01..500.0),
      rng.random_range(0.01..500.0),
      rng.random_range(0.01..500.0),
    );
    let aabb = Aabb::new(min, min + size);
    let grid = 1u32 << rng.random_range(0..7);
    let tolerance = size.max_element() * 1e-5;
    for _ in 0..50 {
      let t = Vec3::new(rng.random(), rng.random(), rng.random());
      let p = min + size * t;
      let cell = aabb.cell_of(p, grid);
      assert!(cell.max_element() < grid);
      let bounds = aabb.cell_bounds(cell, grid);
      assert!(
        bounds.contains_point_approx(p, tolerance),
        "point {p:?} routed to {cell:?} outside {bounds:?}"
      );
    }
  }
}
