//! Morton (Z-order) codes for 3D grid cells.
//!
//! Bit layout per level: `x y z` with X most significant, so the last three
//! bits of a code are the cell's octant inside its parent.

/// Bits per axis supported by a 64-bit code.
pub const MAX_BITS: u32 = 21;

/// Spread the low 21 bits of `v` so two zero bits separate each.
#[inline]
fn split_by_3(v: u32) -> u64 {
  let mut x = (v as u64) & 0x1f_ffff;
  x = (x | x << 32) & 0x001f_0000_0000_ffff;
  x = (x | x << 16) & 0x001f_0000_ff00_00ff;
  x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
  x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
  x = (x | x << 2) & 0x1249_2492_4924_9249;
  x
}

/// Inverse of [`split_by_3`].
#[inline]
fn compact_by_3(v: u64) -> u32 {
  let mut x = v & 0x1249_2492_4924_9249;
  x = (x ^ (x >> 2)) & 0x10c3_0c30_c30c_30c3;
  x = (x ^ (x >> 4)) & 0x100f_00f0_0f00_f00f;
  x = (x ^ (x >> 8)) & 0x001f_0000_ff00_00ff;
  x = (x ^ (x >> 16)) & 0x001f_0000_0000_ffff;
  x = (x ^ (x >> 32)) & 0x1f_ffff;
  x as u32
}

/// Encode grid coordinates (each < 2^21).
#[inline]
pub fn encode(x: u32, y: u32, z: u32) -> u64 {
  (split_by_3(x) << 2) | (split_by_3(y) << 1) | split_by_3(z)
}

/// Decode a code back into grid coordinates.
#[inline]
pub fn decode(code: u64) -> (u32, u32, u32) {
  (compact_by_3(code >> 2), compact_by_3(code >> 1), compact_by_3(code))
}

/// Parent cell one level up.
#[inline]
pub fn parent(code: u64) -> u64 {
  code >> 3
}

/// Child cell one level down.
#[inline]
pub fn child(code: u64, octant: u8) -> u64 {
  (code << 3) | (octant as u64 & 7)
}

/// Octant of the cell inside its parent.
#[inline]
pub fn octant(code: u64) -> u8 {
  (code & 7) as u8
}

/// Octant digits from the root down to a cell at `level`.
pub fn octant_path(code: u64, level: u32) -> Vec<u8> {
  (0..level)
    .rev()
    .map(|i| ((code >> (3 * i)) & 7) as u8)
    .collect()
}

/// Node name for a cell at `level`, e.g. `r052`.
pub fn node_name(code: u64, level: u32) -> String {
  let mut name = String::with_capacity(level as usize + 1);
  name.push('r');
  for digit in octant_path(code, level) {
    name.push(char::from(b'0' + digit));
  }
  name
}

/// Parse a node name back into its octant digits.
///
/// Returns `None` unless the name is `r` followed by digits `0..=7`.
pub fn parse_node_name(name: &str) -> Option<Vec<u8>> {
  let digits = name.strip_prefix('r')?;
  digits
    .bytes()
    .map(|b| match b {
      b'0'..=b'7' => Some(b - b'0'),
      _ => None,
    })
    .collect()
}

/// Morton code and level of a node name.
pub fn code_of_name(name: &str) -> Option<(u64, u32)> {
  let digits = parse_node_name(name)?;
  let code = digits.iter().fold(0u64, |code, &d| child(code, d));
  Some((code, digits.len() as u32))
}
