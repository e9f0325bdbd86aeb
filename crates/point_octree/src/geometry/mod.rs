//! Spatial primitives: bounding boxes, Morton codes, point records, frustum.
//!
//! Pure functions only - no I/O, no shared state.
//!
//! # Octant Convention
//!
//! ```text
//! octant = (x_high << 2) | (y_high << 1) | z_high
//!
//! Morton code = interleave(x, y, z) with X in the top bit of every triplet,
//! so `code & 7` is the octant of the cell inside its parent and
//! `code >> 3` is the parent cell one level up.
//! ```

pub mod aabb;
pub mod frustum;
pub mod morton;
pub mod point;

pub use aabb::Aabb;
pub use frustum::Frustum;
pub use point::{AttributeBuffers, Point, PointEncoding};
