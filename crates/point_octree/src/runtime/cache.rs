//! Point-budgeted LRU cache of loaded nodes.
//!
//! ```text
//! head (least recent) ◄──► ... ◄──► tail (most recent)
//!        ▲ evicted first, together with its loaded subtree
//! ```
//!
//! The list is linked through the id-indexed map, so moves and removals
//! are O(1). Only loaded nodes may enter; the caller unloads every id
//! reported as evicted.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::NodeId;

/// Node-graph queries the cache needs for subtree eviction.
pub trait CacheNodes {
  fn children(&self, id: NodeId) -> SmallVec<[NodeId; 8]>;
  fn is_loaded(&self, id: NodeId) -> bool;
}

/// Outcome of [`LruCache::insert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Insertion {
  /// Cached. `evicted` lists the nodes removed to make room, victims'
  /// descendants included; the caller unloads them.
  Inserted { evicted: Vec<NodeId> },
  /// Not cached: not loaded, or larger than the whole budget.
  Rejected,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
  prev: Option<NodeId>,
  next: Option<NodeId>,
  points: u64,
}

#[derive(Debug)]
pub struct LruCache {
  budget: u64,
  resident: u64,
  entries: HashMap<NodeId, Entry>,
  head: Option<NodeId>,
  tail: Option<NodeId>,
}

impl LruCache {
  pub fn new(point_budget: u64) -> Self {
    Self {
      budget: point_budget,
      resident: 0,
      entries: HashMap::new(),
      head: None,
      tail: None,
    }
  }

  pub fn budget(&self) -> u64 {
    self.budget
  }

  /// Points held by cached nodes.
  pub fn resident_points(&self) -> u64 {
    self.resident
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, id: NodeId) -> bool {
    self.entries.contains_key(&id)
  }

  /// Least recently used node.
  pub fn lru(&self) -> Option<NodeId> {
    self.head
  }

  /// Ids from least to most recently used.
  pub fn iter_lru(&self) -> impl Iterator<Item = NodeId> + '_ {
    std::iter::successors(self.head, move |id| self.entries.get(id).and_then(|e| e.next))
  }

  /// Cache `id` holding `points`, evicting least recently used subtrees
  /// until it fits. Already cached nodes are only moved to the recent end.
  pub fn insert(&mut self, id: NodeId, points: u64, nodes: &impl CacheNodes) -> Insertion {
    if !nodes.is_loaded(id) {
      return Insertion::Rejected;
    }
    if self.contains(id) {
      self.move_to_tail(id);
      return Insertion::Inserted { evicted: Vec::new() };
    }
    if points > self.budget {
      return Insertion::Rejected;
    }

    let mut evicted = Vec::new();
    while self.resident + points > self.budget {
      let Some(victim) = self.head else { break };
      self.evict_subtree(victim, id, nodes, &mut evicted);
    }

    self.entries.insert(
      id,
      Entry {
        prev: self.tail,
        next: None,
        points,
      },
    );
    match self.tail {
      Some(tail) => {
        if let Some(e) = self.entries.get_mut(&tail) {
          e.next = Some(id);
        }
      }
      None => self.head = Some(id),
    }
    self.tail = Some(id);
    self.resident += points;
    if !evicted.is_empty() {
      tracing::trace!(node = ?id, evicted = evicted.len(), "evicted for insertion");
    }
    Insertion::Inserted { evicted }
  }

  /// Mark `id` as most recently used. No-op unless cached and loaded.
  pub fn touch(&mut self, id: NodeId, nodes: &impl CacheNodes) -> bool {
    if !self.contains(id) || !nodes.is_loaded(id) {
      return false;
    }
    self.move_to_tail(id);
    true
  }

  /// Drop `id` from the cache. Returns whether it was cached.
  pub fn remove(&mut self, id: NodeId) -> bool {
    let Some(entry) = self.entries.remove(&id) else {
      return false;
    };
    self.unlink(&entry);
    self.resident -= entry.points;
    true
  }

  /// Remove `victim` and every cached node below it, except `keep`.
  fn evict_subtree(
    &mut self,
    victim: NodeId,
    keep: NodeId,
    nodes: &impl CacheNodes,
    evicted: &mut Vec<NodeId>,
  ) {
    let mut stack = vec![victim];
    while let Some(id) = stack.pop() {
      if id == keep {
        continue;
      }
      if self.remove(id) {
        evicted.push(id);
      }
      stack.extend(nodes.children(id));
    }
  }

  fn unlink(&mut self, entry: &Entry) {
    match entry.prev {
      Some(prev) => {
        if let Some(e) = self.entries.get_mut(&prev) {
          e.next = entry.next;
        }
      }
      None => self.head = entry.next,
    }
    match entry.next {
      Some(next) => {
        if let Some(e) = self.entries.get_mut(&next) {
          e.prev = entry.prev;
        }
      }
      None => self.tail = entry.prev,
    }
  }

  fn move_to_tail(&mut self, id: NodeId) {
    if self.tail == Some(id) {
      return;
    }
    let Some(entry) = self.entries.get(&id).copied() else {
      return;
    };
    self.unlink(&entry);
    let old_tail = self.tail;
    if let Some(e) = self.entries.get_mut(&id) {
      e.prev = old_tail;
      e.next = None;
    }
    match old_tail {
      Some(tail) => {
        if let Some(e) = self.entries.get_mut(&tail) {
          e.next = Some(id);
        }
      }
      None => self.head = Some(id),
    }
    self.tail = Some(id);
  }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
