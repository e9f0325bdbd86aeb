//! Payload flushing and flattening of the finished tree.
//!
//! ```text
//!  finalize order ──► PayloadWriter ──► octree.stage
//!                                           │ flatten (pre-order)
//!                                           ▼
//!                     write_preorder ──► octree.dat, one contiguous
//!                                        range per subtree
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use smallvec::SmallVec;

use super::node::Node;
use crate::constants::POINT_RECORD_SIZE;
use crate::error::{IoContext, OctreeError, Result};
use crate::format::hierarchy::HierarchyNode;
use crate::format::NodeEntry;
use crate::geometry::point;
use crate::io::{SequentialWriter, StopSignal, WriterStats};

/// Stages final node point sets as soon as they are known.
pub struct PayloadWriter {
  writer: SequentialWriter,
  nodes: u64,
  points: u64,
}

impl PayloadWriter {
  pub fn create(path: &Path, memory_cap: u64, stop: StopSignal) -> Result<Self> {
    Ok(Self {
      writer: SequentialWriter::create(path, memory_cap, stop)?,
      nodes: 0,
      points: 0,
    })
  }

  /// Append the node's points, record the staged offset, and release them.
  pub fn flush(&mut self, node: &mut Node) -> Result<()> {
    if node.file_offset.is_some() {
      return Err(OctreeError::Consistency(format!(
        "{} flushed twice",
        node.name
      )));
    }
    let points = node.points.take().unwrap_or_default();
    node.point_count = points.len() as u32;
    let offset = if points.is_empty() {
      self.writer.reserve(0)
    } else {
      self.writer.enqueue_append(point::encode_points(&points))?
    };
    if offset > u32::MAX as u64 {
      return Err(OctreeError::Unsupported(format!(
        "payload offset {offset} of {} exceeds the 32-bit node table range",
        node.name
      )));
    }
    node.file_offset = Some(offset);
    self.nodes += 1;
    self.points += points.len() as u64;
    Ok(())
  }

  pub fn nodes_flushed(&self) -> u64 {
    self.nodes
  }

  pub fn points_flushed(&self) -> u64 {
    self.points
  }

  /// Wait for every payload to land.
  pub fn finish(self) -> Result<WriterStats> {
    let expected = self.writer.reserved_len();
    let stats = self.writer.finish()?;
    if stats.file_len != expected {
      return Err(OctreeError::Consistency(format!(
        "payload file holds {} bytes, {expected} reserved",
        stats.file_len
      )));
    }
    Ok(stats)
  }
}

/// Copy staged payloads into `out` in table order and point the tables
/// at their final offsets.
///
/// Afterwards every entry starts where the previous one ends, so each
/// subtree's points form one contiguous byte range.
pub fn write_preorder(
  tables: &mut FlatTables,
  staged: &Path,
  out: &Path,
  memory_cap: u64,
  stop: StopSignal,
) -> Result<WriterStats> {
  let mut source = File::open(staged).at_path(staged)?;
  let writer = SequentialWriter::create(out, memory_cap, stop)?;
  for (entry, node) in tables.entries.iter_mut().zip(tables.hierarchy.iter_mut()) {
    let size = entry.byte_size();
    let offset = if size == 0 {
      writer.reserve(0)
    } else {
      source.seek(SeekFrom::Start(entry.offset as u64)).at_path(staged)?;
      let mut bytes = vec![0u8; size as usize];
      source.read_exact(&mut bytes).at_path(staged)?;
      writer.enqueue_append(bytes)?
    };
    entry.offset = u32::try_from(offset).map_err(|_| {
      OctreeError::Unsupported(format!("payload offset {offset} exceeds 32 bits"))
    })?;
    node.byte_offset = offset;
  }
  let expected = writer.reserved_len();
  let stats = writer.finish()?;
  if stats.file_len != expected {
    return Err(OctreeError::Consistency(format!(
      "payload file holds {} bytes, {expected} written",
      stats.file_len
    )));
  }
  Ok(stats)
}

/// Pre-order tables of a flushed tree.
#[derive(Clone, Debug, Default)]
pub struct FlatTables {
  pub entries: Vec<NodeEntry>,
  /// Same order as `entries`, with child links by index.
  pub hierarchy: Vec<HierarchyNode>,
}

/// Flatten `root` in pre-order with an explicit stack.
///
/// Every node must be flushed. Descendant counts are derived from the
/// emitted order, not copied from the nodes.
pub fn flatten(root: &Node) -> Result<FlatTables> {
  let mut tables = FlatTables::default();
  let mut parents: Vec<Option<usize>> = Vec::new();
  let mut stack: Vec<(&Node, Option<(usize, u8)>)> = vec![(root, None)];

  while let Some((node, link)) = stack.pop() {
    let index = tables.entries.len();
    let offset = node.file_offset.ok_or_else(|| {
      OctreeError::Consistency(format!("{} was never flushed", node.name))
    })?;
    let offset32 = u32::try_from(offset).map_err(|_| {
      OctreeError::Unsupported(format!("payload offset {offset} exceeds 32 bits"))
    })?;
    tables.entries.push(NodeEntry {
      bounds: node.bounds,
      point_count: node.point_count,
      descendant_count: 0,
      offset: offset32,
    });
    tables.hierarchy.push(HierarchyNode {
      children: [None; 8],
      point_count: node.point_count,
      byte_offset: offset,
      byte_size: node.point_count as u64 * POINT_RECORD_SIZE as u64,
    });
    parents.push(link.map(|(parent, _)| parent));
    if let Some((parent, octant)) = link {
      tables.hierarchy[parent].children[octant as usize] = Some(index);
    }

    let children: SmallVec<[(u8, &Node); 8]> = node.children().collect();
    for (octant, child) in children.into_iter().rev() {
      stack.push((child, Some((index, octant))));
    }
  }

  // children follow their parent, so a reverse sweep sees every subtree
  // size before its parent's
  let mut sizes = vec![1u32; tables.entries.len()];
  for i in (1..sizes.len()).rev() {
    if let Some(parent) = parents[i] {
      sizes[parent] += sizes[i];
    }
  }
  for (entry, size) in tables.entries.iter_mut().zip(sizes) {
    entry.descendant_count = size - 1;
  }
  Ok(tables)
}
