//! Flat NodeEntry table.
//!
//! ```text
//! index:  0    1    2    3    4    5
//! entry:  r    r0   r00  r01  r4   r47
//! desc:   5    2    0    0    1    0
//!
//! entry[i+1 .. i+1+desc[i]] is exactly the subtree rooted at entry[i],
//! so a rejected node skips its whole subtree in O(1).
//! ```

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use smallvec::SmallVec;

use crate::constants::{NODE_ENTRY_SIZE, POINT_RECORD_SIZE};
use crate::error::{IoContext, OctreeError, Result};
use crate::geometry::{point::ensure_little_endian, Aabb};

/// One persisted node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeEntry {
  /// Node bounds.
  pub bounds: Aabb,
  /// Points stored in this node's payload block.
  pub point_count: u32,
  /// Entries following this one that belong to its subtree.
  pub descendant_count: u32,
  /// Byte offset of the payload block in `octree.dat`.
  pub offset: u32,
}

impl NodeEntry {
  /// Size of the payload block in bytes.
  #[inline]
  pub fn byte_size(&self) -> u64 {
    self.point_count as u64 * POINT_RECORD_SIZE as u64
  }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawNodeEntry {
  min: [f32; 3],
  max: [f32; 3],
  point_count: u32,
  descendant_count: u32,
  offset: u32,
}

const _: () = assert!(std::mem::size_of::<RawNodeEntry>() == NODE_ENTRY_SIZE);

/// Serialize entries into the 36-byte-per-entry table.
pub fn encode_table(entries: &[NodeEntry]) -> Vec<u8> {
  let raw: Vec<RawNodeEntry> = entries
    .iter()
    .map(|e| RawNodeEntry {
      min: e.bounds.min.to_array(),
      max: e.bounds.max.to_array(),
      point_count: e.point_count,
      descendant_count: e.descendant_count,
      offset: e.offset,
    })
    .collect();
  bytemuck::cast_slice(&raw).to_vec()
}

/// Parse a table.
pub fn decode_table(bytes: &[u8]) -> Result<Vec<NodeEntry>> {
  ensure_little_endian()?;
  if bytes.len() % NODE_ENTRY_SIZE != 0 {
    return Err(OctreeError::Format(format!(
      "node table of {} bytes is not a multiple of {NODE_ENTRY_SIZE}",
      bytes.len()
    )));
  }
  // unaligned input: copy into an aligned buffer
  let raw: Vec<RawNodeEntry> = bytemuck::pod_collect_to_vec(bytes);
  Ok(
    raw
      .into_iter()
      .map(|r| NodeEntry {
        bounds: Aabb {
          min: Vec3::from_array(r.min),
          max: Vec3::from_array(r.max),
        },
        point_count: r.point_count,
        descendant_count: r.descendant_count,
        offset: r.offset,
      })
      .collect(),
  )
}

/// Write the table to `path`.
pub fn write_table(path: &Path, entries: &[NodeEntry]) -> Result<()> {
  std::fs::write(path, encode_table(entries)).at_path(path)
}

/// Read the table from `path`.
pub fn read_table(path: &Path) -> Result<Vec<NodeEntry>> {
  let bytes = std::fs::read(path).at_path(path)?;
  decode_table(&bytes)
}

/// Structural view of a table: parent/child links by entry index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatTree {
  /// Parent entry index, `None` for the root.
  pub parents: Vec<Option<usize>>,
  /// Child entry indices in table order.
  pub children: Vec<SmallVec<[usize; 8]>>,
}

impl FlatTree {
  /// Tree depth of entry `index` (root = 0).
  pub fn depth(&self, mut index: usize) -> usize {
    let mut depth = 0;
    while let Some(parent) = self.parents[index] {
      index = parent;
      depth += 1;
    }
    depth
  }
}

/// Reconstruct parent/child links, validating the descendant-count invariant.
///
/// Uses an explicit stack of open subtrees, so depth is not limited by the
/// call stack.
pub fn rebuild_tree(entries: &[NodeEntry]) -> Result<FlatTree> {
  let n = entries.len();
  if n == 0 {
    return Ok(FlatTree::default());
  }
  if entries[0].descendant_count as usize != n - 1 {
    return Err(OctreeError::Consistency(format!(
      "root spans {} descendants but the table holds {}",
      entries[0].descendant_count,
      n - 1
    )));
  }

  let mut tree = FlatTree {
    parents: Vec::with_capacity(n),
    children: Vec::with_capacity(n),
  };
  // (entry index, exclusive end of its subtree)
  let mut open: Vec<(usize, usize)> = Vec::new();
  for (i, entry) in entries.iter().enumerate() {
    let end = i + 1 + entry.descendant_count as usize;
    while matches!(open.last(), Some(&(_, top_end)) if i >= top_end) {
      open.pop();
    }
    let parent = match open.last() {
      Some(&(p, p_end)) => {
        if end > p_end {
          return Err(OctreeError::Consistency(format!(
            "entry {i} subtree ends at {end}, past its parent's end {p_end}"
          )));
        }
        Some(p)
      }
      None if i == 0 => None,
      None => {
        return Err(OctreeError::Consistency(format!(
          "entry {i} lies outside the root subtree"
        )))
      }
    };
    tree.parents.push(parent);
    tree.children.push(SmallVec::new());
    if let Some(p) = parent {
      if tree.children[p].len() == 8 {
        return Err(OctreeError::Consistency(format!(
          "entry {p} has more than 8 children"
        )));
      }
      tree.children[p].push(i);
    }
    open.push((i, end));
  }
  Ok(tree)
}

/// Check the descendant-count invariant without keeping the structure.
pub fn validate_table(entries: &[NodeEntry]) -> Result<()> {
  rebuild_tree(entries).map(|_| ())
}

/// Result of a streaming visibility walk over a table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeMask {
  /// Per-entry visibility.
  pub mask: Vec<bool>,
  /// Entries whose predicate returned false.
  pub rejected: usize,
  /// Descendants skipped without being visited.
  pub skipped: usize,
}

impl TreeMask {
  /// Indices of visible entries.
  pub fn visible(&self) -> impl Iterator<Item = usize> + '_ {
    self
      .mask
      .iter()
      .enumerate()
      .filter_map(|(i, &v)| v.then_some(i))
  }
}

/// Walk the table in order, evaluating `is_visible` only on entries whose
/// ancestors were all visible. A rejected entry skips its subtree.
pub fn tree_mask(
  entries: &[NodeEntry],
  mut is_visible: impl FnMut(usize, &NodeEntry) -> bool,
) -> TreeMask {
  let mut result = TreeMask {
    mask: vec![false; entries.len()],
    ..Default::default()
  };
  let mut i = 0;
  while i < entries.len() {
    let entry = &entries[i];
    if is_visible(i, entry) {
      result.mask[i] = true;
      i += 1;
    } else {
      let skip = (entry.descendant_count as usize).min(entries.len() - i - 1);
      result.rejected += 1;
      result.skipped += skip;
      i += 1 + skip;
    }
  }
  result
}

#[cfg(test)]
#[path = "node_entry_test.rs"]
mod node_entry_test;
