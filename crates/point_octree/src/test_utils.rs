//! Shared helpers for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geometry::Point;

/// Scratch directory under the system temp dir, removed on drop.
pub struct ScratchDir {
  path: PathBuf,
}

impl ScratchDir {
  pub fn new(tag: &str) -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
      "point_octree_{tag}_{}_{n}",
      std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&path);
    std::fs::create_dir_all(&path).expect("create scratch dir");
    Self { path }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn join(&self, name: &str) -> PathBuf {
    self.path.join(name)
  }
}

impl Drop for ScratchDir {
  fn drop(&mut self) {
    let _ = std::fs::remove_dir_all(&self.path);
  }
}

/// Uniformly distributed points inside `[0, extent]³`.
pub fn uniform_cube(n: usize, extent: f32, seed: u64) -> Vec<Point> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n)
    .map(|_| {
      let p = Vec3::new(rng.random(), rng.random(), rng.random()) * extent;
      Point::new(p, [rng.random(), rng.random(), rng.random()])
    })
    .collect()
}

/// Poll `cond` every millisecond for up to `ms` milliseconds.
pub fn wait_until(ms: u64, mut cond: impl FnMut() -> bool) -> bool {
  for _ in 0..ms {
    if cond() {
      return true;
    }
    std::thread::sleep(std::time::Duration::from_millis(1));
  }
  cond()
}
