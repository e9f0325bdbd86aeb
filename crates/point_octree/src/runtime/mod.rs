//! Runtime streaming of a built octree under a point budget.
//!
//! ```text
//!  front end ── set_camera ──► StreamingSession ◄── take_frame ── front end
//!                                    │
//!                     octree-traversal thread (every interval)
//!                                    │
//!        ┌───────────────┬───────────┴─────────┬────────────────────┐
//!   NodeLoader      HierarchyLoader        LruCache           FrameExchange
//!  (rayon tasks)   (hierarchy-loader)   (point budget)     (render/delete)
//! ```
//!
//! Lock order: traverser, then cache, then node state. A node lock is never
//! held while another lock is taken.

pub mod cache;
pub mod frame;
pub mod geometry;
pub mod hierarchy_loader;
pub mod loader;
pub mod node;
pub mod session;
pub mod traversal;

pub use cache::{CacheNodes, Insertion, LruCache};
pub use frame::{Frame, FrameExchange, RenderNode};
pub use geometry::OctreeGeometry;
pub use hierarchy_loader::HierarchyLoader;
pub use loader::{LoadCompletion, NodeLoader};
pub use node::{GeometryNode, LoadState, NodeId, NodeState, NodeTable};
pub use session::StreamingSession;
pub use traversal::{CameraState, IdleWatch, TraversalOutput, TraversalStats, Traverser};
