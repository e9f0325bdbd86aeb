//! `cloud.json`: the human-readable description written next to the
//! binary outputs.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::constants::FORMAT_VERSION;
use crate::error::{IoContext, OctreeError, Result};
use crate::geometry::{Aabb, PointEncoding};

/// Byte order of every binary file of the cloud.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
  Little,
  Big,
}

/// Location of the root hierarchy chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyInfo {
  /// Size in bytes of the first chunk in `hierarchy.bin`.
  pub first_chunk_size: u64,
  /// Levels per chunk.
  pub step: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloudManifest {
  pub version: u32,
  pub point_count: u64,
  pub node_count: u64,
  /// Cubic root bounds, `[min, max]`.
  pub bounds: [[f32; 3]; 2],
  /// Tight bounds of the input points.
  pub tight_bounds: [[f32; 3]; 2],
  #[serde(default)]
  pub encoding: PointEncoding,
  /// Per-axis scale applied to quantized positions.
  pub scale: [f64; 3],
  /// Per-axis offset added after scaling.
  pub offset: [f64; 3],
  pub endianness: Endianness,
  /// Present when `hierarchy.bin` was written.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hierarchy: Option<HierarchyInfo>,
}

fn to_pair(aabb: &Aabb) -> [[f32; 3]; 2] {
  [aabb.min.to_array(), aabb.max.to_array()]
}

impl CloudManifest {
  /// Manifest for a float-encoded cloud.
  pub fn new(point_count: u64, node_count: u64, cubic: &Aabb, tight: &Aabb) -> Self {
    Self {
      version: FORMAT_VERSION,
      point_count,
      node_count,
      bounds: to_pair(cubic),
      tight_bounds: to_pair(tight),
      encoding: PointEncoding::Float32Rgb8,
      scale: [1.0; 3],
      offset: [0.0; 3],
      endianness: Endianness::Little,
      hierarchy: None,
    }
  }

  pub fn cubic_bounds(&self) -> Aabb {
    Aabb::new(Vec3::from_array(self.bounds[0]), Vec3::from_array(self.bounds[1]))
  }

  pub fn tight_bounds(&self) -> Aabb {
    Aabb::new(
      Vec3::from_array(self.tight_bounds[0]),
      Vec3::from_array(self.tight_bounds[1]),
    )
  }

  /// Reject versions and byte orders this crate cannot read.
  pub fn validate(&self) -> Result<()> {
    if self.version != FORMAT_VERSION {
      return Err(OctreeError::Unsupported(format!(
        "format version {} (expected {FORMAT_VERSION})",
        self.version
      )));
    }
    if self.endianness != Endianness::Little {
      return Err(OctreeError::Unsupported("big-endian point data".into()));
    }
    Ok(())
  }

  pub fn write(&self, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(self)
      .map_err(|e| OctreeError::Format(format!("manifest: {e}")))?;
    std::fs::write(path, text).at_path(path)
  }

  pub fn read(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path).at_path(path)?;
    let manifest: Self = serde_json::from_str(&text)
      .map_err(|e| OctreeError::Format(format!("{}: {e}", path.display())))?;
    manifest.validate()?;
    Ok(manifest)
  }
}
