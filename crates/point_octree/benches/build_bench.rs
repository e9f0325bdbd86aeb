//! Build pipeline benchmarks.
//!
//! - **morton**: cell code encoding over a fine grid
//! - **bucket_count**: routing points to chunker cells and counting them
//! - **subsample**: one parent over eight populated leaves
//! - **build**: a full small build, recorded into `BuildMetrics`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use glam::Vec3;
use point_octree::{
  build::{Node, Subsampler},
  build_octree,
  geometry::morton,
  metrics::BuildMetrics,
  Aabb, BuildConfig, MemoryPointSource, Point, StopSignal,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_points(n: usize, seed: u64) -> Vec<Point> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n)
    .map(|_| {
      let p = Vec3::new(rng.random(), rng.random(), rng.random()) * 100.0;
      Point::new(p, [rng.random(), rng.random(), rng.random()])
    })
    .collect()
}

fn cube() -> Aabb {
  Aabb::new(Vec3::ZERO, Vec3::splat(100.0))
}

fn bench_morton(c: &mut Criterion) {
  c.bench_function("morton/encode_128_cubed", |b| {
    b.iter(|| {
      let mut acc = 0u64;
      for x in 0..128u32 {
        for y in 0..128u32 {
          for z in 0..128u32 {
            acc ^= morton::encode(black_box(x), y, z);
          }
        }
      }
      acc
    })
  });
}

fn bench_bucket_count(c: &mut Criterion) {
  let points = random_points(200_000, 1);
  let bounds = cube();
  let mut group = c.benchmark_group("bucket_count");
  for grid in [16u32, 64, 128] {
    group.bench_with_input(BenchmarkId::from_parameter(grid), &grid, |b, &grid| {
      b.iter(|| {
        let mut counts = vec![0u32; (grid as usize).pow(3)];
        for p in &points {
          counts[bounds.morton_cell_of(p.position, grid) as usize] += 1;
        }
        black_box(counts)
      })
    });
  }
  group.finish();
}

/// Parent over eight leaves holding `per_leaf` points each.
fn two_level_tree(per_leaf: usize) -> Node {
  let bounds = cube();
  let mut root = Node::inner("r".into(), bounds);
  let mut buckets: [Vec<Point>; 8] = Default::default();
  for p in random_points(per_leaf * 8, 2) {
    buckets[bounds.octant_of(p.position) as usize].push(p);
  }
  for (octant, points) in buckets.into_iter().enumerate() {
    let octant = octant as u8;
    let leaf = Node::leaf(root.child_name(octant), bounds.child(octant), points);
    // fresh tree, octants are distinct
    let _ = root.attach(octant, leaf);
  }
  root
}

fn bench_subsample(c: &mut Criterion) {
  let mut group = c.benchmark_group("subsample");
  for per_leaf in [5_000usize, 20_000] {
    group.bench_with_input(BenchmarkId::from_parameter(per_leaf), &per_leaf, |b, &n| {
      b.iter_batched(
        || (two_level_tree(n), Subsampler::new(128, 0.7)),
        |(mut root, mut sampler)| {
          sampler
            .subsample_tree(&mut root, &mut |_| Ok(()))
            .map(|_| root.point_count)
        },
        BatchSize::LargeInput,
      )
    });
  }
  group.finish();
}

fn bench_build(c: &mut Criterion) {
  let source = MemoryPointSource::new(random_points(50_000, 3));
  let out = std::env::temp_dir().join(format!("point_octree_bench_{}", std::process::id()));
  let config = BuildConfig {
    max_chunk_size: 10_000,
    max_node_size: 2_000,
    ..BuildConfig::SMALL
  };
  let mut metrics = BuildMetrics::new();
  c.bench_function("build/50k", |b| {
    b.iter(|| {
      if let Ok(report) = build_octree(&source, &out, &config, &StopSignal::new()) {
        metrics.record(&report);
      }
    })
  });
  let _ = std::fs::remove_dir_all(&out);
  if metrics.builds > 0 {
    println!("build throughput: {:.0} points/s", metrics.throughput());
  }
}

criterion_group!(
  benches,
  bench_morton,
  bench_bucket_count,
  bench_subsample,
  bench_build
);
criterion_main!(benches);
