use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

/// Node graph with explicit loaded flags.
#[derive(Default)]
struct Graph {
  children: HashMap<NodeId, Vec<NodeId>>,
  unloaded: HashSet<NodeId>,
}

impl CacheNodes for Graph {
  fn children(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
    self.children.get(&id).map(|c| c.iter().copied().collect()).unwrap_or_default()
  }

  fn is_loaded(&self, id: NodeId) -> bool {
    !self.unloaded.contains(&id)
  }
}

const A: NodeId = NodeId(1);
const B: NodeId = NodeId(2);
const C: NodeId = NodeId(3);

#[test]
fn oldest_node_is_evicted_first() {
  let graph = Graph::default();
  let mut cache = LruCache::new(1000);
  assert_eq!(cache.insert(A, 400, &graph), Insertion::Inserted { evicted: vec![] });
  assert_eq!(cache.insert(B, 400, &graph), Insertion::Inserted { evicted: vec![] });
  assert_eq!(cache.insert(C, 400, &graph), Insertion::Inserted { evicted: vec![A] });
  assert_eq!(cache.lru(), Some(B));
  assert_eq!(cache.resident_points(), 800);
  assert_eq!(cache.iter_lru().collect::<Vec<_>>(), vec![B, C]);
}

#[test]
fn touch_protects_from_eviction() {
  let graph = Graph::default();
  let mut cache = LruCache::new(1000);
  cache.insert(A, 400, &graph);
  cache.insert(B, 400, &graph);
  assert!(cache.touch(A, &graph));
  assert_eq!(cache.insert(C, 400, &graph), Insertion::Inserted { evicted: vec![B] });
  assert_eq!(cache.iter_lru().collect::<Vec<_>>(), vec![A, C]);
}

#[test]
fn eviction_takes_the_whole_subtree() {
  let mut graph = Graph::default();
  // A -> {4, 5}, 5 -> {6}
  graph.children.insert(A, vec![NodeId(4), NodeId(5)]);
  graph.children.insert(NodeId(5), vec![NodeId(6)]);
  let mut cache = LruCache::new(100);
  for id in [A, NodeId(4), NodeId(5), NodeId(6)] {
    cache.insert(id, 20, &graph);
  }
  cache.insert(B, 10, &graph);
  // needs 30 more: evicting A alone would do, but its subtree goes too
  let Insertion::Inserted { mut evicted } = cache.insert(C, 30, &graph) else {
    panic!("rejected");
  };
  evicted.sort();
  assert_eq!(evicted, vec![A, NodeId(4), NodeId(5), NodeId(6)]);
  assert_eq!(cache.resident_points(), 40);
}

#[test]
fn incoming_descendant_is_not_evicted() {
  let mut graph = Graph::default();
  graph.children.insert(A, vec![B]);
  let mut cache = LruCache::new(100);
  cache.insert(A, 80, &graph);
  assert_eq!(cache.insert(B, 50, &graph), Insertion::Inserted { evicted: vec![A] });
  assert!(cache.contains(B));
}

#[test]
fn oversize_node_is_rejected_without_evicting() {
  let graph = Graph::default();
  let mut cache = LruCache::new(1000);
  cache.insert(A, 400, &graph);
  assert_eq!(cache.insert(B, 1001, &graph), Insertion::Rejected);
  assert!(cache.contains(A));
  assert_eq!(cache.resident_points(), 400);
}

#[test]
fn unloaded_nodes_are_never_cached() {
  let mut graph = Graph::default();
  graph.unloaded.insert(A);
  let mut cache = LruCache::new(1000);
  assert_eq!(cache.insert(A, 10, &graph), Insertion::Rejected);
  assert!(!cache.touch(A, &graph));
  assert!(cache.is_empty());
}

#[test]
fn reinsert_moves_to_recent_end() {
  let graph = Graph::default();
  let mut cache = LruCache::new(1000);
  cache.insert(A, 100, &graph);
  cache.insert(B, 100, &graph);
  cache.insert(A, 100, &graph);
  assert_eq!(cache.lru(), Some(B));
  assert_eq!(cache.resident_points(), 200);
}

#[test]
fn budget_holds_under_random_operations() {
  let mut rng = StdRng::seed_from_u64(11);
  let mut graph = Graph::default();
  for parent in 0..50u32 {
    let kids: Vec<NodeId> = (0..rng.random_range(0..3))
      .map(|_| NodeId(rng.random_range(parent + 1..60)))
      .collect();
    graph.children.insert(NodeId(parent), kids);
  }
  let mut cache = LruCache::new(1_000);
  let mut sizes: HashMap<NodeId, u64> = HashMap::new();

  for _ in 0..2_000 {
    let id = NodeId(rng.random_range(0..60));
    match rng.random_range(0..4) {
      0 => {
        cache.touch(id, &graph);
      }
      1 => {
        cache.remove(id);
        graph.unloaded.insert(id);
      }
      _ => {
        graph.unloaded.remove(&id);
        let points = *sizes.entry(id).or_insert_with(|| rng.random_range(1..400));
        if let Insertion::Inserted { evicted } = cache.insert(id, points, &graph) {
          for e in evicted {
            graph.unloaded.insert(e);
          }
        }
      }
    }

    assert!(cache.resident_points() <= cache.budget());
    let listed: Vec<NodeId> = cache.iter_lru().collect();
    assert_eq!(listed.len(), cache.len());
    let total: u64 = listed.iter().map(|id| sizes[id]).sum();
    assert_eq!(total, cache.resident_points());
    assert!(listed.iter().all(|&id| graph.is_loaded(id)));
  }
}
