//! Point records and their fixed-width binary encodings.
//!
//! ```text
//! offset  0        4        8        12  13  14
//!         ├────────┼────────┼────────┼───┼───┤
//!         │  x f32 │  y f32 │  z f32 │ r │ g │ b
//! ```
//!
//! 15 bytes, little-endian, no padding. `Int32Rgb8` shares the layout with
//! quantized `i32` positions decoded through a scale/offset transform.

use bytemuck::{Pod, Zeroable};
use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::POINT_RECORD_SIZE;
use crate::error::{OctreeError, Result};

/// A point as seen by the build pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
  /// Position in source coordinates.
  pub position: Vec3,
  /// 8-bit RGB color.
  pub color: [u8; 3],
}

impl Point {
  pub fn new(position: Vec3, color: [u8; 3]) -> Self {
    Self { position, color }
  }

  /// Quantize a normalized `[0, 1]` float color to 8 bits.
  pub fn from_rgb_f32(position: Vec3, rgb: [f32; 3]) -> Self {
    let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    Self {
      position,
      color: [q(rgb[0]), q(rgb[1]), q(rgb[2])],
    }
  }
}

/// On-disk float record.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FloatRecord {
  position: [f32; 3],
  color: [u8; 3],
}

/// On-disk quantized record.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuantizedRecord {
  position: [i32; 3],
  color: [u8; 3],
}

const _: () = assert!(std::mem::size_of::<FloatRecord>() == POINT_RECORD_SIZE);
const _: () = assert!(std::mem::size_of::<QuantizedRecord>() == POINT_RECORD_SIZE);

/// Record encodings understood by the payload decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointEncoding {
  /// 3×f32 position + 3×u8 color. Written by the builder.
  #[default]
  Float32Rgb8,
  /// 3×i32 quantized position + 3×u8 color.
  Int32Rgb8,
}

impl PointEncoding {
  /// Bytes per record.
  #[inline]
  pub fn record_size(self) -> usize {
    POINT_RECORD_SIZE
  }
}

/// Fail on hosts whose byte order differs from the persisted format.
#[inline]
pub(crate) fn ensure_little_endian() -> Result<()> {
  if cfg!(target_endian = "big") {
    return Err(OctreeError::Unsupported(
      "big-endian hosts cannot read little-endian point records".into(),
    ));
  }
  Ok(())
}

/// Append float records for `points` to `out`.
pub fn encode_points_into(points: &[Point], out: &mut Vec<u8>) {
  out.reserve(points.len() * POINT_RECORD_SIZE);
  for p in points {
    let record = FloatRecord {
      position: p.position.to_array(),
      color: p.color,
    };
    out.extend_from_slice(bytemuck::bytes_of(&record));
  }
}

/// Encode points as float records.
pub fn encode_points(points: &[Point]) -> Vec<u8> {
  let mut out = Vec::new();
  encode_points_into(points, &mut out);
  out
}

/// Decode float records into build-time points.
pub fn decode_points(bytes: &[u8]) -> Result<Vec<Point>> {
  ensure_little_endian()?;
  let records: &[FloatRecord] = bytemuck::try_cast_slice(bytes).map_err(|_| {
    OctreeError::Format(format!(
      "{} bytes is not a whole number of {POINT_RECORD_SIZE}-byte records",
      bytes.len()
    ))
  })?;
  Ok(
    records
      .iter()
      .map(|r| Point::new(Vec3::from_array(r.position), r.color))
      .collect(),
  )
}

/// Encode points as quantized records: `raw = round((p - offset) / scale)`.
pub fn encode_quantized(points: &[Point], scale: DVec3, offset: DVec3) -> Vec<u8> {
  let mut out = Vec::with_capacity(points.len() * POINT_RECORD_SIZE);
  for p in points {
    let q = ((p.position.as_dvec3() - offset) / scale).round();
    let record = QuantizedRecord {
      position: [q.x as i32, q.y as i32, q.z as i32],
      color: p.color,
    };
    out.extend_from_slice(bytemuck::bytes_of(&record));
  }
  out
}

/// Decoded per-node attribute buffers handed to the rendering front end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeBuffers {
  /// World-space positions.
  pub positions: Vec<[f32; 3]>,
  /// Normalized `[0, 1]` colors.
  pub colors: Vec<[f32; 3]>,
}

impl AttributeBuffers {
  #[inline]
  pub fn len(&self) -> usize {
    self.positions.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }

  /// Approximate heap size in bytes.
  pub fn byte_size(&self) -> usize {
    self.positions.len() * 12 + self.colors.len() * 12
  }
}

/// Decode a payload block into typed buffers.
///
/// Positions are `raw * scale + offset` in double precision, then narrowed.
pub fn decode_attributes(
  bytes: &[u8],
  encoding: PointEncoding,
  scale: DVec3,
  offset: DVec3,
) -> Result<AttributeBuffers> {
  ensure_little_endian()?;
  if bytes.len() % POINT_RECORD_SIZE != 0 {
    return Err(OctreeError::Format(format!(
      "payload of {} bytes is not a whole number of records",
      bytes.len()
    )));
  }
  let unorm = |c: [u8; 3]| [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0];
  let transform = |raw: DVec3| (raw * scale + offset).as_vec3().to_array();

  let mut buffers = AttributeBuffers {
    positions: Vec::with_capacity(bytes.len() / POINT_RECORD_SIZE),
    colors: Vec::with_capacity(bytes.len() / POINT_RECORD_SIZE),
  };
  match encoding {
    PointEncoding::Float32Rgb8 => {
      let records: &[FloatRecord] = bytemuck::cast_slice(bytes);
      for r in records {
        let position = r.position;
        buffers
          .positions
          .push(transform(Vec3::from_array(position).as_dvec3()));
        buffers.colors.push(unorm(r.color));
      }
    }
    PointEncoding::Int32Rgb8 => {
      let records: &[QuantizedRecord] = bytemuck::cast_slice(bytes);
      for r in records {
        let position = r.position;
        let [x, y, z] = position;
        buffers
          .positions
          .push(transform(DVec3::new(x as f64, y as f64, z as f64)));
        buffers.colors.push(unorm(r.color));
      }
    }
  }
  Ok(buffers)
}

#[cfg(test)]
#[path = "point_test.rs"]
mod point_test;
