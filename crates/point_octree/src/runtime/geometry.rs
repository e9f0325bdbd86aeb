//! Opening a built octree for streaming.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::DVec3;
use smallvec::SmallVec;

use super::cache::CacheNodes;
use super::node::{GeometryNode, NodeId, NodeState, NodeTable};
use crate::constants::{HIERARCHY_FILE, MANIFEST_FILE, META_FILE, OCTREE_FILE, POINT_RECORD_SIZE, ROOT_NAME};
use crate::error::{IoContext, OctreeError, Result};
use crate::format::hierarchy::{link_chunk, ChunkNode};
use crate::format::node_entry::{read_table, rebuild_tree};
use crate::format::{CloudManifest, NodeKind};
use crate::geometry::{point, AttributeBuffers};

/// Read-only view of a built octree plus its lazily grown node table.
#[derive(Debug)]
pub struct OctreeGeometry {
  dir: PathBuf,
  manifest: CloudManifest,
  nodes: NodeTable,
  root: NodeId,
  paged: bool,
}

impl OctreeGeometry {
  /// Open `dir`, using the paged hierarchy when the manifest lists one.
  pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref();
    let manifest = CloudManifest::read(&dir.join(MANIFEST_FILE))?;
    if manifest.hierarchy.is_some() && dir.join(HIERARCHY_FILE).exists() {
      Self::open_paged(dir, manifest)
    } else {
      Self::open_flat(dir, manifest)
    }
  }

  /// Materialize every node from the flat `meta.dat` table.
  pub fn open_flat(dir: &Path, manifest: CloudManifest) -> Result<Self> {
    let entries = read_table(&dir.join(META_FILE))?;
    if entries.is_empty() {
      return Err(OctreeError::Format("node table is empty".into()));
    }
    let tree = rebuild_tree(&entries)?;
    let nodes = NodeTable::new();
    let mut names: Vec<String> = Vec::with_capacity(entries.len());

    // pre-order: parents are pushed before their children
    for (i, entry) in entries.iter().enumerate() {
      let parent = tree.parents[i];
      let name = match parent {
        None => ROOT_NAME.to_string(),
        Some(p) => {
          let octant = entries[p].bounds.octant_of(entry.bounds.center());
          format!("{}{}", names[p], octant)
        }
      };
      names.push(name.clone());
      let kind = if tree.children[i].is_empty() {
        NodeKind::Leaf
      } else {
        NodeKind::Normal
      };
      let mut state = NodeState::new(kind, entry.point_count, entry.offset as u64, entry.byte_size());
      for &c in &tree.children[i] {
        let octant = entry.bounds.octant_of(entries[c].bounds.center());
        if state.children[octant as usize].replace(NodeId(c as u32)).is_some() {
          return Err(OctreeError::Consistency(format!(
            "entry {i} has two children in octant {octant}"
          )));
        }
      }
      nodes.push_with(|id| {
        GeometryNode::new(id, name, entry.bounds, parent.map(|p| NodeId(p as u32)), state)
      });
    }
    tracing::info!(nodes = nodes.len(), dir = %dir.display(), "opened flat octree");
    Ok(Self {
      dir: dir.to_path_buf(),
      manifest,
      nodes,
      root: NodeId(0),
      paged: false,
    })
  }

  /// Materialize the root hierarchy chunk; proxies expand later.
  pub fn open_paged(dir: &Path, manifest: CloudManifest) -> Result<Self> {
    let info = manifest
      .hierarchy
      .ok_or_else(|| OctreeError::Format("manifest lists no hierarchy".into()))?;
    let geometry = Self {
      dir: dir.to_path_buf(),
      nodes: NodeTable::new(),
      root: NodeId(0),
      paged: true,
      manifest,
    };
    let bytes = geometry.read_hierarchy(0, info.first_chunk_size)?;
    let linked = link_chunk(&bytes)?;
    let Some(first) = linked.first() else {
      return Err(OctreeError::Format("root hierarchy chunk is empty".into()));
    };
    let bounds = geometry.manifest.cubic_bounds();
    let root = geometry.nodes.push_with(|id| {
      GeometryNode::new(id, ROOT_NAME.to_string(), bounds, None, state_of(first))
    });
    let children = geometry.attach_chunk(root, &linked)?;
    if let Some(node) = geometry.node(root) {
      node.state().children = children;
    }
    tracing::info!(nodes = geometry.nodes.len(), "opened paged octree");
    Ok(geometry)
  }

  pub fn manifest(&self) -> &CloudManifest {
    &self.manifest
  }

  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn is_paged(&self) -> bool {
    self.paged
  }

  pub fn node(&self, id: NodeId) -> Option<Arc<GeometryNode>> {
    self.nodes.get(id)
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn nodes(&self) -> &NodeTable {
    &self.nodes
  }

  /// Replace the proxy `id` with the chunk its range addresses.
  ///
  /// The chunk's first entry describes `id` itself. Returns the number of
  /// new nodes.
  pub fn expand_proxy(&self, id: NodeId) -> Result<usize> {
    let node = self
      .node(id)
      .ok_or_else(|| OctreeError::Consistency(format!("unknown node {id:?}")))?;
    let range = {
      let mut state = node.state();
      if state.kind != NodeKind::Proxy {
        return Ok(0);
      }
      // taken so a concurrent request sees the proxy as in progress
      match state.hierarchy_range.take() {
        Some(range) => range,
        None => return Ok(0),
      }
    };
    match self.expand_range(&node, range) {
      Ok(added) => {
        tracing::debug!(node = %node.name, added, "expanded proxy");
        Ok(added)
      }
      Err(e) => {
        node.state().hierarchy_range = Some(range);
        Err(e)
      }
    }
  }

  fn expand_range(&self, node: &GeometryNode, range: (u64, u64)) -> Result<usize> {
    let bytes = self.read_hierarchy(range.0, range.1)?;
    let linked = link_chunk(&bytes)?;
    let Some(first) = linked.first() else {
      return Err(OctreeError::Format(format!("hierarchy chunk of {} is empty", node.name)));
    };
    if first.entry.kind == NodeKind::Proxy {
      return Err(OctreeError::Format(format!(
        "hierarchy chunk of {} starts with a proxy",
        node.name
      )));
    }
    let before = self.nodes.len();
    let children = self.attach_chunk(node.id, &linked)?;
    let fresh = state_of(first);
    let mut state = node.state();
    state.kind = fresh.kind;
    state.point_count = fresh.point_count;
    state.byte_offset = fresh.byte_offset;
    state.byte_size = fresh.byte_size;
    state.children = children;
    Ok(self.nodes.len() - before)
  }

  /// Create nodes for `linked[1..]` below `root` and return the root's
  /// children, which the caller installs. `linked[0]` is `root` itself.
  fn attach_chunk(&self, root: NodeId, linked: &[ChunkNode]) -> Result<[Option<NodeId>; 8]> {
    let root_node = self
      .node(root)
      .ok_or_else(|| OctreeError::Consistency(format!("unknown node {root:?}")))?;
    let mut ids: Vec<NodeId> = Vec::with_capacity(linked.len());
    let mut handles: Vec<Arc<GeometryNode>> = Vec::with_capacity(linked.len());
    ids.push(root);
    handles.push(root_node);
    let mut children: Vec<[Option<NodeId>; 8]> = vec![[None; 8]; linked.len()];

    for (i, chunk_node) in linked.iter().enumerate().skip(1) {
      let parent = chunk_node
        .parent
        .ok_or_else(|| OctreeError::Format(format!("hierarchy entry {i} has no parent")))?;
      let parent_node = Arc::clone(&handles[parent]);
      let octant = chunk_node.octant;
      let name = format!("{}{}", parent_node.name, octant);
      let bounds = parent_node.bounds.child(octant);
      let id = self.nodes.push_with(|id| {
        GeometryNode::new(id, name, bounds, Some(ids[parent]), state_of(chunk_node))
      });
      children[parent][octant as usize] = Some(id);
      ids.push(id);
      handles.push(self.nodes.get(id).ok_or_else(|| {
        OctreeError::Consistency(format!("node {id:?} vanished"))
      })?);
    }
    for (handle, kids) in handles.iter().zip(&children).skip(1) {
      handle.state().children = *kids;
    }
    Ok(children[0])
  }

  fn read_range(&self, file: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
    let path = self.dir.join(file);
    let mut handle = File::open(&path).at_path(&path)?;
    handle.seek(SeekFrom::Start(offset)).at_path(&path)?;
    let mut bytes = vec![0u8; len as usize];
    handle.read_exact(&mut bytes).at_path(&path)?;
    Ok(bytes)
  }

  fn read_hierarchy(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
    self.read_range(HIERARCHY_FILE, offset, len)
  }

  /// Read and decode the payload of `node`. Zero-point nodes do no I/O.
  pub fn read_payload(&self, node: &GeometryNode) -> Result<AttributeBuffers> {
    let (offset, size, count) = {
      let state = node.state();
      (state.byte_offset, state.byte_size, state.point_count)
    };
    if count == 0 {
      return Ok(AttributeBuffers::default());
    }
    if size != count as u64 * POINT_RECORD_SIZE as u64 {
      return Err(OctreeError::Format(format!(
        "{}: {size} payload bytes for {count} points",
        node.name
      )));
    }
    let bytes = self.read_range(OCTREE_FILE, offset, size)?;
    point::decode_attributes(
      &bytes,
      self.manifest.encoding,
      DVec3::from_array(self.manifest.scale),
      DVec3::from_array(self.manifest.offset),
    )
  }
}

fn state_of(node: &ChunkNode) -> NodeState {
  let e = node.entry;
  match e.kind {
    NodeKind::Proxy => {
      let mut state = NodeState::new(NodeKind::Proxy, e.point_count, 0, 0);
      state.hierarchy_range = Some((e.byte_offset, e.byte_size));
      state
    }
    kind => NodeState::new(kind, e.point_count, e.byte_offset, e.byte_size),
  }
}

impl CacheNodes for OctreeGeometry {
  fn children(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
    self.node(id).map(|n| n.children()).unwrap_or_default()
  }

  fn is_loaded(&self, id: NodeId) -> bool {
    self.node(id).is_some_and(|n| n.is_loaded())
  }
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod geometry_test;
