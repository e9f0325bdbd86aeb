use glam::Vec3;

use super::*;
use crate::test_utils::ScratchDir;

fn entry(descendant_count: u32, point_count: u32) -> NodeEntry {
  NodeEntry {
    bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
    point_count,
    descendant_count,
    offset: 0,
  }
}

/// r, r0, r00, r01, r4, r47
fn sample_table() -> Vec<NodeEntry> {
  vec![entry(5, 10), entry(2, 8), entry(0, 3), entry(0, 4), entry(1, 6), entry(0, 2)]
}

#[test]
fn encode_is_36_bytes_per_entry() {
  let table = sample_table();
  let bytes = encode_table(&table);
  assert_eq!(bytes.len(), table.len() * NODE_ENTRY_SIZE);
  assert_eq!(decode_table(&bytes).unwrap(), table);
}

#[test]
fn field_layout_is_bounds_counts_offset() {
  let e = NodeEntry {
    bounds: Aabb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)),
    point_count: 7,
    descendant_count: 8,
    offset: 9,
  };
  let bytes = encode_table(&[e]);
  assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
  assert_eq!(f32::from_le_bytes(bytes[20..24].try_into().unwrap()), 6.0);
  assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 7);
  assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 8);
  assert_eq!(u32::from_le_bytes(bytes[32..36].try_into().unwrap()), 9);
}

#[test]
fn decode_rejects_truncated_table() {
  let mut bytes = encode_table(&sample_table());
  bytes.pop();
  assert!(matches!(decode_table(&bytes), Err(OctreeError::Format(_))));
}

#[test]
fn decode_accepts_unaligned_slice() {
  let bytes = encode_table(&sample_table());
  let mut shifted = vec![0u8];
  shifted.extend_from_slice(&bytes);
  assert_eq!(decode_table(&shifted[1..]).unwrap(), sample_table());
}

#[test]
fn rebuild_links_children_in_order() {
  let tree = rebuild_tree(&sample_table()).unwrap();
  assert_eq!(tree.parents, vec![None, Some(0), Some(1), Some(1), Some(0), Some(4)]);
  assert_eq!(tree.children[0].as_slice(), &[1, 4]);
  assert_eq!(tree.children[1].as_slice(), &[2, 3]);
  assert!(tree.children[2].is_empty());
  assert_eq!(tree.depth(5), 2);
}

#[test]
fn rebuild_rejects_overrunning_subtree() {
  let mut table = sample_table();
  // r0 claims r4
  table[1].descendant_count = 3;
  let err = rebuild_tree(&table).unwrap_err();
  assert!(err.is_consistency(), "{err}");
}

#[test]
fn rebuild_rejects_short_root() {
  let mut table = sample_table();
  table[0].descendant_count = 4;
  assert!(validate_table(&table).unwrap_err().is_consistency());
}

#[test]
fn empty_table_is_valid() {
  assert!(validate_table(&[]).is_ok());
}

#[test]
fn mask_skips_rejected_subtree() {
  let table = sample_table();
  let mut visited = Vec::new();
  let mask = tree_mask(&table, |i, _| {
    visited.push(i);
    i != 1
  });
  // r00 and r01 are never evaluated
  assert_eq!(visited, vec![0, 1, 4, 5]);
  assert_eq!(mask.visible().collect::<Vec<_>>(), vec![0, 4, 5]);
  assert_eq!(mask.rejected, 1);
  assert_eq!(mask.skipped, 2);
}

#[test]
fn rejected_root_skips_everything() {
  let table = sample_table();
  let mask = tree_mask(&table, |_, _| false);
  assert_eq!(mask.visible().count(), 0);
  assert_eq!(mask.skipped, table[0].descendant_count as usize);
}

#[test]
fn table_file_round_trip() {
  let dir = ScratchDir::new("node-table");
  let path = dir.join("meta.dat");
  write_table(&path, &sample_table()).unwrap();
  assert_eq!(read_table(&path).unwrap(), sample_table());
  assert_eq!(sample_table()[1].byte_size(), 8 * 15);
}
