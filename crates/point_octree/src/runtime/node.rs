//! Runtime node table.
//!
//! Nodes live in one append-only table and refer to each other by
//! [`NodeId`]; the parent link is an index, never an owning reference.
//!
//! ```text
//!            begin_load          finish_load
//! Unloaded ─────────────► Loading ────────────► Loaded
//!    ▲                                            │
//!    └────────── unload (evict/dispose/failed) ───┘
//! ```
//!
//! A failed read still completes, with an empty payload, and is unloaded
//! right away.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;

use crate::format::NodeKind;
use crate::geometry::{Aabb, AttributeBuffers};

/// Index into the node table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
  #[inline]
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
  Unloaded,
  Loading,
  Loaded,
}

/// Mutable part of a node, guarded by the node's lock.
#[derive(Clone, Debug)]
pub struct NodeState {
  pub load: LoadState,
  /// Front-end GPU resources exist for this node.
  pub created: bool,
  pub point_count: u32,
  /// Payload range in `octree.dat`.
  pub byte_offset: u64,
  pub byte_size: u64,
  pub kind: NodeKind,
  /// Hierarchy chunk range of an unexpanded proxy.
  pub hierarchy_range: Option<(u64, u64)>,
  pub children: [Option<NodeId>; 8],
  pub payload: Option<Arc<AttributeBuffers>>,
}

impl NodeState {
  pub fn new(kind: NodeKind, point_count: u32, byte_offset: u64, byte_size: u64) -> Self {
    Self {
      load: LoadState::Unloaded,
      created: false,
      point_count,
      byte_offset,
      byte_size,
      kind,
      hierarchy_range: None,
      children: [None; 8],
      payload: None,
    }
  }

  pub fn child_ids(&self) -> SmallVec<[NodeId; 8]> {
    self.children.iter().flatten().copied().collect()
  }
}

#[derive(Debug)]
pub struct GeometryNode {
  pub id: NodeId,
  /// Octant-digit path from the root.
  pub name: String,
  pub bounds: Aabb,
  pub parent: Option<NodeId>,
  state: Mutex<NodeState>,
}

impl GeometryNode {
  pub fn new(id: NodeId, name: String, bounds: Aabb, parent: Option<NodeId>, state: NodeState) -> Self {
    Self {
      id,
      name,
      bounds,
      parent,
      state: Mutex::new(state),
    }
  }

  /// Depth below the root.
  #[inline]
  pub fn level(&self) -> u32 {
    self.name.len().saturating_sub(1) as u32
  }

  /// Lock the mutable state. Never held while taking the cache lock.
  #[inline]
  pub fn state(&self) -> MutexGuard<'_, NodeState> {
    self.state.lock()
  }

  pub fn is_loaded(&self) -> bool {
    self.state().load == LoadState::Loaded
  }

  pub fn load_state(&self) -> LoadState {
    self.state().load
  }

  pub fn point_count(&self) -> u32 {
    self.state().point_count
  }

  pub fn children(&self) -> SmallVec<[NodeId; 8]> {
    self.state().child_ids()
  }

  /// `Unloaded -> Loading`. False when the node is in any other state or
  /// is an unexpanded proxy.
  pub fn begin_load(&self) -> bool {
    let mut state = self.state();
    if state.load != LoadState::Unloaded || state.kind == NodeKind::Proxy {
      return false;
    }
    state.load = LoadState::Loading;
    true
  }

  /// `Loading -> Loaded`, attaching the payload.
  pub fn finish_load(&self, payload: Arc<AttributeBuffers>) -> bool {
    let mut state = self.state();
    if state.load != LoadState::Loading {
      return false;
    }
    state.load = LoadState::Loaded;
    state.payload = Some(payload);
    true
  }

  /// `Loaded -> Unloaded`, dropping the payload. Loading nodes are left
  /// alone; they must complete first. Returns whether the node was loaded.
  pub fn unload(&self) -> bool {
    let mut state = self.state();
    if state.load != LoadState::Loaded {
      return false;
    }
    state.load = LoadState::Unloaded;
    state.payload = None;
    state.created = false;
    true
  }
}

/// Append-only table of every node discovered so far.
#[derive(Debug, Default)]
pub struct NodeTable {
  nodes: RwLock<Vec<Arc<GeometryNode>>>,
}

impl NodeTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, id: NodeId) -> Option<Arc<GeometryNode>> {
    self.nodes.read().get(id.index()).cloned()
  }

  pub fn len(&self) -> usize {
    self.nodes.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.read().is_empty()
  }

  /// Id the next pushed node will receive.
  pub fn next_id(&self) -> NodeId {
    NodeId(self.len() as u32)
  }

  /// Append nodes built by `build`, which receives each new node's id.
  pub fn push_with(&self, build: impl FnOnce(NodeId) -> GeometryNode) -> NodeId {
    let mut nodes = self.nodes.write();
    let id = NodeId(nodes.len() as u32);
    nodes.push(Arc::new(build(id)));
    id
  }

  /// Snapshot of all nodes.
  pub fn all(&self) -> Vec<Arc<GeometryNode>> {
    self.nodes.read().clone()
  }
}
