//! Paged hierarchy (`hierarchy.bin`).
//!
//! The tree is cut into chunks `step` levels deep. Each chunk is a
//! contiguous run of 22-byte entries in breadth-first order whose first
//! entry is the chunk root. A node on a chunk's bottom level that still
//! has children is written as a [`NodeKind::Proxy`] whose byte range
//! addresses the chunk rooted at that node.
//!
//! ```text
//! offset  size  field
//! 0       1     kind (0 normal, 1 leaf, 2 proxy)
//! 1       1     child mask, bit i = octant i
//! 2       4     point count
//! 6       8     byte offset (payload, or hierarchy chunk for proxies)
//! 14      8     byte size
//! ```

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};

use crate::constants::HIERARCHY_ENTRY_SIZE;
use crate::error::{OctreeError, Result};
use crate::geometry::point::ensure_little_endian;

/// Node type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
  /// Inner node whose children follow in the same chunk.
  Normal,
  /// Node without children.
  Leaf,
  /// Placeholder whose subtree lives in another chunk.
  Proxy,
}

impl NodeKind {
  fn to_byte(self) -> u8 {
    match self {
      Self::Normal => 0,
      Self::Leaf => 1,
      Self::Proxy => 2,
    }
  }

  fn from_byte(byte: u8) -> Result<Self> {
    match byte {
      0 => Ok(Self::Normal),
      1 => Ok(Self::Leaf),
      2 => Ok(Self::Proxy),
      other => Err(OctreeError::Format(format!("unknown node type {other}"))),
    }
  }
}

/// One hierarchy record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HierarchyEntry {
  pub kind: NodeKind,
  pub child_mask: u8,
  pub point_count: u32,
  pub byte_offset: u64,
  pub byte_size: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawHierarchyEntry {
  kind: u8,
  child_mask: u8,
  point_count: u32,
  byte_offset: u64,
  byte_size: u64,
}

const _: () = assert!(std::mem::size_of::<RawHierarchyEntry>() == HIERARCHY_ENTRY_SIZE);

/// Decode a chunk's entries.
pub fn decode_chunk(bytes: &[u8]) -> Result<Vec<HierarchyEntry>> {
  ensure_little_endian()?;
  if bytes.len() % HIERARCHY_ENTRY_SIZE != 0 {
    return Err(OctreeError::Format(format!(
      "hierarchy chunk of {} bytes is not a multiple of {HIERARCHY_ENTRY_SIZE}",
      bytes.len()
    )));
  }
  let raw: &[RawHierarchyEntry] = bytemuck::try_cast_slice(bytes)
    .map_err(|e| OctreeError::Format(format!("hierarchy chunk: {e}")))?;
  raw
    .iter()
    .map(|r| {
      Ok(HierarchyEntry {
        kind: NodeKind::from_byte(r.kind)?,
        child_mask: r.child_mask,
        point_count: r.point_count,
        byte_offset: r.byte_offset,
        byte_size: r.byte_size,
      })
    })
    .collect()
}

fn encode_entry(entry: &HierarchyEntry, out: &mut Vec<u8>) {
  let raw = RawHierarchyEntry {
    kind: entry.kind.to_byte(),
    child_mask: entry.child_mask,
    point_count: entry.point_count,
    byte_offset: entry.byte_offset,
    byte_size: entry.byte_size,
  };
  out.extend_from_slice(bytemuck::bytes_of(&raw));
}

/// Entry of a decoded chunk, linked to its parent inside the chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkNode {
  pub entry: HierarchyEntry,
  /// Index of the parent within the chunk, `None` for the chunk root.
  pub parent: Option<usize>,
  /// Octant inside the parent (unused for the chunk root).
  pub octant: u8,
}

/// Decode a chunk and assign children in breadth-first order.
///
/// Children of normal entries consume the following entries in ascending
/// octant order. Proxy and leaf entries consume none.
pub fn link_chunk(bytes: &[u8]) -> Result<Vec<ChunkNode>> {
  let entries = decode_chunk(bytes)?;
  let mut nodes: Vec<ChunkNode> = entries
    .iter()
    .map(|&entry| ChunkNode {
      entry,
      parent: None,
      octant: 0,
    })
    .collect();
  let mut next = 1;
  for i in 0..entries.len() {
    if entries[i].kind != NodeKind::Normal {
      continue;
    }
    for octant in 0..8u8 {
      if entries[i].child_mask & (1 << octant) == 0 {
        continue;
      }
      let Some(child) = nodes.get_mut(next) else {
        return Err(OctreeError::Format(format!(
          "hierarchy chunk of {} entries ends inside the children of entry {i}",
          entries.len()
        )));
      };
      child.parent = Some(i);
      child.octant = octant;
      next += 1;
    }
  }
  if next != entries.len() && !entries.is_empty() {
    return Err(OctreeError::Format(format!(
      "hierarchy chunk has {} unreferenced entries",
      entries.len() - next
    )));
  }
  Ok(nodes)
}

/// Node as seen by the hierarchy writer.
#[derive(Clone, Debug, Default)]
pub struct HierarchyNode {
  pub children: [Option<usize>; 8],
  pub point_count: u32,
  pub byte_offset: u64,
  pub byte_size: u64,
}

impl HierarchyNode {
  fn child_mask(&self) -> u8 {
    self
      .children
      .iter()
      .enumerate()
      .filter(|(_, c)| c.is_some())
      .fold(0, |mask, (i, _)| mask | (1 << i))
  }
}

/// Encoded hierarchy and the byte size of its root chunk.
#[derive(Clone, Debug)]
pub struct EncodedHierarchy {
  pub bytes: Vec<u8>,
  pub root_chunk_size: u64,
  pub chunk_count: usize,
}

/// Lay out and encode the hierarchy for `nodes`, rooted at index 0.
///
/// Two passes: the first collects each chunk's breadth-first node list so
/// every chunk's byte range is known before any proxy is emitted.
pub fn encode_hierarchy(nodes: &[HierarchyNode], step: u32) -> Result<EncodedHierarchy> {
  if nodes.is_empty() {
    return Ok(EncodedHierarchy {
      bytes: Vec::new(),
      root_chunk_size: 0,
      chunk_count: 0,
    });
  }
  if step == 0 {
    return Err(OctreeError::Config("hierarchy_step must be at least 1".into()));
  }

  // (node index, is proxy) per chunk, chunks in discovery order
  let mut chunks: Vec<Vec<(usize, bool)>> = Vec::new();
  let mut chunk_of_root: Vec<Option<usize>> = vec![None; nodes.len()];
  let mut pending = VecDeque::from([0usize]);
  while let Some(chunk_root) = pending.pop_front() {
    chunk_of_root[chunk_root] = Some(chunks.len());
    let mut members = Vec::new();
    let mut queue = VecDeque::from([(chunk_root, 0u32)]);
    while let Some((index, depth)) = queue.pop_front() {
      let node = nodes.get(index).ok_or_else(|| {
        OctreeError::Consistency(format!("hierarchy child index {index} out of range"))
      })?;
      let has_children = node.children.iter().any(Option::is_some);
      let proxy = depth == step && has_children;
      members.push((index, proxy));
      if proxy {
        pending.push_back(index);
      } else if depth < step {
        queue.extend(node.children.iter().flatten().map(|&c| (c, depth + 1)));
      }
    }
    chunks.push(members);
  }

  let mut chunk_offsets = Vec::with_capacity(chunks.len());
  let mut cursor = 0u64;
  for members in &chunks {
    chunk_offsets.push(cursor);
    cursor += (members.len() * HIERARCHY_ENTRY_SIZE) as u64;
  }

  let mut bytes = Vec::with_capacity(cursor as usize);
  for members in &chunks {
    for &(index, proxy) in members {
      let node = &nodes[index];
      let mask = node.child_mask();
      let entry = if proxy {
        let Some(target) = chunk_of_root[index] else {
          return Err(OctreeError::Consistency(format!(
            "proxy {index} has no chunk"
          )));
        };
        HierarchyEntry {
          kind: NodeKind::Proxy,
          child_mask: mask,
          point_count: node.point_count,
          byte_offset: chunk_offsets[target],
          byte_size: (chunks[target].len() * HIERARCHY_ENTRY_SIZE) as u64,
        }
      } else {
        HierarchyEntry {
          kind: if mask == 0 { NodeKind::Leaf } else { NodeKind::Normal },
          child_mask: mask,
          point_count: node.point_count,
          byte_offset: node.byte_offset,
          byte_size: node.byte_size,
        }
      };
      encode_entry(&entry, &mut bytes);
    }
  }

  Ok(EncodedHierarchy {
    root_chunk_size: (chunks[0].len() * HIERARCHY_ENTRY_SIZE) as u64,
    chunk_count: chunks.len(),
    bytes,
  })
}
