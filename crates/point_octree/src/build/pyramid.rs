//! Bottom-up count pyramid over a Morton-indexed grid.
//!
//! ```text
//! level 0   1 cell            count = sum(level 1)
//! level 1   8 cells
//! ...
//! level L   8^L cells         fine counts, grid = 2^L per axis
//! ```
//!
//! Cell `c` at level `l` covers cells `c<<3 .. c<<3 + 8` at level `l + 1`,
//! so every parent's children are contiguous.

/// A selected terminal cell: `(level, morton code)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
  pub level: u32,
  pub code: u64,
}

impl Cell {
  pub const ROOT: Cell = Cell { level: 0, code: 0 };

  #[inline]
  pub fn child(self, octant: u8) -> Cell {
    Cell {
      level: self.level + 1,
      code: (self.code << 3) | octant as u64,
    }
  }

  /// Range of fine cells at `finest` covered by this cell.
  #[inline]
  pub fn fine_range(self, finest: u32) -> std::ops::Range<u64> {
    let shift = 3 * (finest - self.level);
    (self.code << shift)..((self.code + 1) << shift)
  }
}

#[derive(Clone, Debug)]
pub struct CountPyramid {
  levels: Vec<Vec<u64>>,
}

impl CountPyramid {
  /// Build from fine counts. `counts.len()` must be a power of 8.
  pub fn from_fine(counts: Vec<u64>) -> Self {
    debug_assert!(counts.len().is_power_of_two() && counts.len().trailing_zeros() % 3 == 0);
    let mut levels = vec![counts];
    while levels[0].len() > 1 {
      let coarser: Vec<u64> = levels[0].chunks_exact(8).map(|c| c.iter().sum()).collect();
      levels.insert(0, coarser);
    }
    Self { levels }
  }

  /// Index of the finest level.
  #[inline]
  pub fn finest_level(&self) -> u32 {
    (self.levels.len() - 1) as u32
  }

  #[inline]
  pub fn count(&self, cell: Cell) -> u64 {
    self.levels[cell.level as usize][cell.code as usize]
  }

  #[inline]
  pub fn total(&self) -> u64 {
    self.levels[0][0]
  }

  pub fn level(&self, level: u32) -> &[u64] {
    &self.levels[level as usize]
  }

  /// Descend from the root, stopping at cells holding at most `max_points`
  /// or at the finest level. Empty cells are dropped. Results are in
  /// Morton (pre-order) order.
  pub fn select(&self, max_points: u64) -> Vec<Cell> {
    let finest = self.finest_level();
    let mut selected = Vec::new();
    let mut stack = vec![Cell::ROOT];
    while let Some(cell) = stack.pop() {
      let count = self.count(cell);
      if count == 0 {
        continue;
      }
      if count <= max_points || cell.level == finest {
        selected.push(cell);
      } else {
        stack.extend((0..8u8).rev().map(|o| cell.child(o)));
      }
    }
    selected
  }

  /// Map every fine cell to the index of the selected cell covering it.
  /// Uncovered (empty) fine cells map to `u32::MAX`.
  pub fn lookup_table(&self, selected: &[Cell]) -> Vec<u32> {
    let finest = self.finest_level();
    let mut lut = vec![u32::MAX; self.levels[finest as usize].len()];
    for (i, cell) in selected.iter().enumerate() {
      let range = cell.fine_range(finest);
      lut[range.start as usize..range.end as usize].fill(i as u32);
    }
    lut
  }
}
