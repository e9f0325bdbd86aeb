//! Persisted formats.
//!
//! - [`node_entry`]: flat pre-order NodeEntry table (`meta.dat`)
//! - [`hierarchy`]: paged hierarchy entries (`hierarchy.bin`)
//! - [`manifest`]: cloud description (`cloud.json`)

pub mod hierarchy;
pub mod manifest;
pub mod node_entry;

pub use hierarchy::{HierarchyEntry, NodeKind};
pub use manifest::{CloudManifest, Endianness, HierarchyInfo};
pub use node_entry::{FlatTree, NodeEntry, TreeMask};
