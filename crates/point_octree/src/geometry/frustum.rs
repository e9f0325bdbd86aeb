//! View frustum as six inward-facing planes.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use super::Aabb;

/// Six clip planes `(n, d)` with `dot(n, p) + d >= 0` inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
  pub planes: [Vec4; 6],
}

impl Frustum {
  /// Extract planes from a view-projection matrix (left, right, bottom, top,
  /// near, far), assuming a `[0, 1]` depth range.
  pub fn from_view_projection(view_proj: &Mat4) -> Self {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);
    let normalize = |p: Vec4| {
      let len = p.xyz().length();
      if len > 0.0 {
        p / len
      } else {
        p
      }
    };
    Self {
      planes: [
        normalize(r3 + r0),
        normalize(r3 - r0),
        normalize(r3 + r1),
        normalize(r3 - r1),
        normalize(r2),
        normalize(r3 - r2),
      ],
    }
  }

  /// A frustum that accepts everything.
  pub fn everything() -> Self {
    Self {
      planes: [Vec4::new(0.0, 0.0, 0.0, 1.0); 6],
    }
  }

  /// True when `p` is inside or on every plane.
  #[inline]
  pub fn contains_point(&self, p: Vec3) -> bool {
    self.planes.iter().all(|plane| plane.xyz().dot(p) + plane.w >= 0.0)
  }

  /// Conservative box test: rejects only boxes fully outside one plane.
  #[inline]
  pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
    self.planes.iter().all(|plane| {
      let n = plane.xyz();
      // corner furthest along the plane normal
      let positive = Vec3::select(n.cmpge(Vec3::ZERO), aabb.max, aabb.min);
      n.dot(positive) + plane.w >= 0.0
    })
  }
}

impl Default for Frustum {
  fn default() -> Self {
    Self::everything()
  }
}
