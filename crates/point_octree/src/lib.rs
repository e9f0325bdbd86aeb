//! point_octree - Out-of-core octree construction and streaming for massive
//! point clouds.
//!
//! The crate has two halves that share one on-disk format:
//!
//! ```text
//!  BUILD (offline, two out-of-core passes)
//! ┌─────────────┐    ┌─────────┐    ┌─────────┐    ┌──────────────────────┐
//! │ PointSource ├───►│ Chunker ├───►│ Indexer ├───►│ Stitcher/Serializer  │
//! └─────────────┘    └─────────┘    └─────────┘    └──────────┬───────────┘
//!                   chunks/r052.dat  Node tree       meta.dat │ octree.dat
//!                                    per chunk   hierarchy.bin│ cloud.json
//!                                                             ▼
//!  STREAM (runtime, bounded working set)
//! ┌───────────────────┐    ┌────────────┐    ┌──────────┐    ┌───────────────┐
//! │ Traverser (50 ms) ├───►│ NodeLoader ├───►│ LruCache ├───►│ FrameExchange │
//! └───────────────────┘    └────────────┘    └──────────┘    └───────────────┘
//!    projected size          ≤ N loads        point budget     render/delete
//! ```
//!
//! # Example
//!
//! ```ignore
//! use point_octree::{build_octree, BuildConfig, MemoryPointSource, StopSignal};
//!
//! let source = MemoryPointSource::new(points);
//! let report = build_octree(&source, "out/", &BuildConfig::default(), &StopSignal::new())?;
//! println!("{} nodes over {} chunks", report.node_count, report.chunk_count);
//! ```

pub mod constants;
pub mod error;
pub use error::{OctreeError, Result};

// Configuration (TOML-loadable)
pub mod config;
pub use config::{BuildConfig, StreamConfig};

// Geometry: bounding boxes, Morton codes, point records, frustum
pub mod geometry;
pub use geometry::{Aabb, Frustum, Point, PointEncoding};

// Disk I/O primitives (writers, reader, dispatcher, stop signal)
pub mod io;
pub use io::StopSignal;

// Input collaborators
pub mod source;
pub use source::{MemoryPointSource, PointSource, RawPointFile};

// Persisted formats: node table, hierarchy pages, manifest
pub mod format;
pub use format::{CloudManifest, HierarchyEntry, NodeEntry};

// Offline build pipeline
pub mod build;
pub use build::{build_octree, BuildReport};

// Runtime streaming
pub mod runtime;
pub use runtime::{CameraState, LruCache, OctreeGeometry, StreamingSession};

pub mod metrics;

#[cfg(test)]
pub(crate) mod test_utils;
