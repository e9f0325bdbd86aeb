use std::collections::HashSet;

use super::*;
use crate::build::build_octree;
use crate::config::BuildConfig;
use crate::constants::OCTREE_FILE;
use crate::io::StopSignal;
use crate::source::MemoryPointSource;
use crate::test_utils::{uniform_cube, ScratchDir};

const IDLE_MS: u64 = 5_000;

fn build(dir: &ScratchDir, hierarchy_step: u32) {
  let config = BuildConfig {
    max_chunk_size: 2_000,
    max_node_size: 500,
    hierarchy_step,
    ..BuildConfig::SMALL
  };
  let source = MemoryPointSource::new(uniform_cube(10_000, 100.0, 11));
  build_octree(&source, dir.path(), &config, &StopSignal::new()).unwrap();
}

fn stream_config(point_budget: u64) -> StreamConfig {
  StreamConfig {
    point_budget,
    max_concurrent_loads: 64,
    min_node_pixel_size: 1.0,
    traversal_interval_ms: 10,
    dispose_depth_floor: 0,
  }
}

fn traverser(geometry: &Arc<OctreeGeometry>, config: StreamConfig) -> Traverser {
  let hierarchy = geometry
    .is_paged()
    .then(|| HierarchyLoader::spawn(Arc::clone(geometry), StopSignal::new()).unwrap());
  Traverser::new(
    Arc::clone(geometry),
    config,
    hierarchy,
    Arc::new(Mutex::new(StreamMetrics::new())),
  )
}

fn facing_cloud() -> CameraState {
  CameraState::looking_at(
    Vec3::new(50.0, 50.0, 250.0),
    Vec3::new(50.0, 50.0, 50.0),
    60f32.to_radians(),
    (800.0, 600.0),
  )
}

fn facing_away() -> CameraState {
  CameraState::looking_at(
    Vec3::new(50.0, 50.0, 250.0),
    Vec3::new(50.0, 50.0, 500.0),
    60f32.to_radians(),
    (800.0, 600.0),
  )
}

/// Run `passes` passes, letting background work settle after each.
fn settle(traverser: &mut Traverser, camera: &CameraState, passes: usize) -> TraversalOutput {
  let mut last = TraversalOutput::default();
  for _ in 0..passes {
    last = traverser.pass(camera);
    assert!(traverser.wait_idle(IDLE_MS));
  }
  last
}

#[test]
fn projected_size_shrinks_with_distance() {
  let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
  let at = |z: f32| CameraState::new(Vec3::new(0.0, 0.0, z), Frustum::everything(), 1.0, 1000.0);

  assert_eq!(at(0.0).projected_size(&bounds), f32::INFINITY);
  let near = at(10.0).projected_size(&bounds);
  let far = at(20.0).projected_size(&bounds);
  assert!(near > far && far > 0.0);

  let expected = 500.0 / (0.5f32.tan() * 10.0) * 3f32.sqrt();
  assert!((near - expected).abs() < 1e-3, "{near} vs {expected}");
}

#[test]
fn candidates_pop_largest_first() {
  let mut heap = BinaryHeap::new();
  for (priority, id) in [(3.0, 1), (f32::INFINITY, 0), (7.5, 2), (3.0, 3)] {
    heap.push(Candidate {
      priority,
      id: NodeId(id),
    });
  }
  let order: Vec<u32> = std::iter::from_fn(|| heap.pop()).map(|c| c.id.0).collect();
  assert_eq!(order, vec![0, 2, 1, 3]);
}

#[test]
fn root_renders_once_loaded() {
  let dir = ScratchDir::new("trav-root");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  let mut traverser = traverser(&geometry, stream_config(1_000_000));
  let camera = facing_cloud();

  let first = traverser.pass(&camera);
  assert!(first.render.is_empty());
  assert!(first.stats.loads_requested >= 1);
  assert!(traverser.wait_idle(IDLE_MS));

  let second = traverser.pass(&camera);
  assert!(second.render.iter().any(|n| n.id == geometry.root()));
  let root = second.render.iter().find(|n| n.id == geometry.root()).unwrap();
  assert_eq!(root.payload.len(), root.point_count as usize);
  assert!(!root.created);
}

#[test]
fn everything_renders_under_a_large_budget() {
  let dir = ScratchDir::new("trav-all");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  let mut traverser = traverser(&geometry, stream_config(1_000_000));

  let out = settle(&mut traverser, &facing_cloud(), 16);
  let total: u64 = out.render.iter().map(|n| n.point_count as u64).sum();
  assert_eq!(total, 10_000);
  assert_eq!(traverser.cache().lock().resident_points(), 10_000);
  assert_eq!(out.stats.remaining_budget, 1_000_000 - 10_000);
}

#[test]
fn rendering_and_residency_respect_the_budget() {
  let dir = ScratchDir::new("trav-budget");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  let root_points = geometry.node(geometry.root()).unwrap().point_count() as u64;
  let budget = root_points * 2;
  let mut traverser = traverser(&geometry, stream_config(budget));

  for _ in 0..12 {
    let out = traverser.pass(&facing_cloud());
    let rendered: u64 = out.render.iter().map(|n| n.point_count as u64).sum();
    assert!(rendered <= budget, "{rendered} > {budget}");
    assert!(traverser.cache().lock().resident_points() <= budget);
    assert!(traverser.wait_idle(IDLE_MS));
  }
  // loaded implies cached
  let cache = traverser.cache().lock();
  for node in geometry.nodes().all() {
    if node.is_loaded() {
      assert!(cache.contains(node.id), "{} loaded but uncached", node.name);
    }
  }
}

#[test]
fn turning_away_disposes_the_loaded_tree() {
  let dir = ScratchDir::new("trav-dispose");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  let mut traverser = traverser(&geometry, stream_config(1_000_000));
  settle(&mut traverser, &facing_cloud(), 16);
  let loaded: HashSet<NodeId> = geometry
    .nodes()
    .all()
    .iter()
    .filter(|n| n.is_loaded())
    .map(|n| n.id)
    .collect();
  assert!(!loaded.is_empty());

  let out = traverser.pass(&facing_away());
  assert!(out.render.is_empty());
  assert_eq!(out.stats.culled, 1);
  // completions drained by this pass are disposed along with the rest
  let deleted: HashSet<NodeId> = out.delete.iter().copied().collect();
  assert!(deleted.is_superset(&loaded));
  assert_eq!(out.stats.disposed as usize, out.delete.len());
  assert!(traverser.cache().lock().is_empty());
  assert!(geometry.nodes().all().iter().all(|n| !n.is_loaded()));
}

#[test]
fn disposing_skips_subtrees_that_never_loaded() {
  let dir = ScratchDir::new("trav-dispose-cold");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  assert!(geometry.node_count() > 1);
  let mut traverser = traverser(&geometry, stream_config(1_000_000));

  let out = traverser.pass(&facing_away());
  assert_eq!(out.stats.culled, 1);
  assert_eq!(out.stats.dispose_checked, 1);
  assert_eq!(out.stats.disposed, 0);
}

#[test]
fn nodes_at_the_depth_floor_are_disposed() {
  let dir = ScratchDir::new("trav-floor-level");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  let config = StreamConfig {
    dispose_depth_floor: 1,
    ..stream_config(1_000_000)
  };
  let mut traverser = traverser(&geometry, config);
  settle(&mut traverser, &facing_cloud(), 16);

  // narrow view down onto one corner culls every level-1 node but one
  let corner = CameraState::looking_at(
    Vec3::new(5.0, 5.0, 250.0),
    Vec3::new(5.0, 5.0, 0.0),
    6f32.to_radians(),
    (800.0, 600.0),
  );
  let out = traverser.pass(&corner);
  let levels: Vec<u32> = out
    .delete
    .iter()
    .map(|&id| geometry.node(id).unwrap().level())
    .collect();
  assert!(levels.contains(&1), "{levels:?}");
  assert!(levels.iter().all(|&l| l >= 1));
  assert!(geometry.node(geometry.root()).unwrap().is_loaded());
}

#[test]
fn shallow_nodes_survive_above_the_depth_floor() {
  let dir = ScratchDir::new("trav-floor");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  let config = StreamConfig {
    dispose_depth_floor: 1,
    ..stream_config(1_000_000)
  };
  let mut traverser = traverser(&geometry, config);
  settle(&mut traverser, &facing_cloud(), 4);
  assert!(geometry.node(geometry.root()).unwrap().is_loaded());

  let out = traverser.pass(&facing_away());
  assert_eq!(out.stats.disposed, 0);
  assert!(geometry.node(geometry.root()).unwrap().is_loaded());
}

#[test]
fn failed_load_completes_empty_and_retries() {
  let dir = ScratchDir::new("trav-fail");
  build(&dir, 4);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  std::fs::remove_file(dir.join(OCTREE_FILE)).unwrap();
  let mut traverser = traverser(&geometry, stream_config(1_000_000));
  let camera = facing_cloud();

  let first = settle(&mut traverser, &camera, 1);
  assert!(first.stats.loads_requested >= 1);
  let out = traverser.pass(&camera);
  // counted only after Loaded -> Unloaded, so every failure completed first
  assert!(out.stats.load_failures >= 1);
  assert_eq!(out.stats.evicted, 0);
  assert!(out.render.is_empty());
  assert!(out.delete.is_empty());
  assert!(traverser.cache().lock().is_empty());
  // failed nodes are back to unloaded and requested again by the same pass
  assert!(out.stats.loads_requested >= out.stats.load_failures);
  let root = geometry.node(geometry.root()).unwrap();
  assert_eq!(root.load_state(), LoadState::Loading);
  assert!(root.state().payload.is_none());
  assert!(traverser.wait_idle(IDLE_MS));

  let again = traverser.pass(&camera);
  assert!(again.stats.load_failures >= 1);
  assert!(traverser.cache().lock().is_empty());
}

#[test]
fn proxies_expand_as_they_come_into_view() {
  let dir = ScratchDir::new("trav-paged");
  build(&dir, 1);
  let geometry = Arc::new(OctreeGeometry::open(dir.path()).unwrap());
  assert!(geometry.is_paged());
  let mut traverser = traverser(&geometry, stream_config(1_000_000));

  let out = settle(&mut traverser, &facing_cloud(), 24);
  assert!(
    geometry.nodes().all().iter().all(|n| n.state().kind != NodeKind::Proxy),
    "unexpanded proxies remain"
  );
  assert!(traverser.hierarchy().unwrap().expanded() > 0);
  assert_eq!(geometry.node_count() as u64, geometry.manifest().node_count);
  let total: u64 = out.render.iter().map(|n| n.point_count as u64).sum();
  assert_eq!(total, 10_000);
}
