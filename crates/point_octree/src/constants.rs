//! On-disk layout constants.
//!
//! ```text
//! out_dir/
//! ├── chunks/r052.dat   15-byte point records of one spatial chunk (build only)
//! ├── meta.dat          36-byte NodeEntry records, pre-order DFS
//! ├── octree.stage      payload blocks in finalize order (build only)
//! ├── octree.dat        point payload blocks addressed by NodeEntry offsets
//! ├── hierarchy.bin     22-byte paged hierarchy entries (optional)
//! └── cloud.json        manifest
//! ```

/// Bytes per point record: 3×f32 position + 3×u8 color, no padding.
pub const POINT_RECORD_SIZE: usize = 15;

/// Bytes per flattened node: 6×f32 bbox + point count + descendant count + offset.
pub const NODE_ENTRY_SIZE: usize = 36;

/// Bytes per hierarchy entry: type, child mask, point count, byte offset, byte size.
pub const HIERARCHY_ENTRY_SIZE: usize = 22;

/// Directory holding per-chunk point files during the build.
pub const CHUNK_DIR: &str = "chunks";

/// Extension of per-chunk point files.
pub const CHUNK_EXTENSION: &str = "dat";

/// Flat NodeEntry table.
pub const META_FILE: &str = "meta.dat";

/// Point payload file.
pub const OCTREE_FILE: &str = "octree.dat";

/// Payloads in finalize order, rewritten into `octree.dat` (build only).
pub const PAYLOAD_STAGE_FILE: &str = "octree.stage";

/// Paged hierarchy file.
pub const HIERARCHY_FILE: &str = "hierarchy.bin";

/// Manifest describing the persisted cloud.
pub const MANIFEST_FILE: &str = "cloud.json";

/// Name of the root node; children append their octant digit.
pub const ROOT_NAME: &str = "r";

/// Manifest format version.
pub const FORMAT_VERSION: u32 = 1;

/// Deepest octree level the builder will create.
///
/// Bounds recursion in the indexer; nodes at this depth keep all their points.
pub const MAX_TREE_LEVEL: usize = 24;
