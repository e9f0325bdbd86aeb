//! Grafting chunk subtrees onto the global skeleton.

use super::chunker::ChunkSet;
use super::indexer::{index_chunk, load_chunk};
use super::node::Node;
use super::subsample::Subsampler;
use crate::config::BuildConfig;
use crate::constants::ROOT_NAME;
use crate::error::{OctreeError, Result};
use crate::geometry::{morton, Aabb};
use crate::io::StopSignal;

/// Global tree above chunk level, built only along chunk paths.
pub struct Skeleton {
  root: Node,
  root_is_chunk: bool,
}

impl Skeleton {
  pub fn new(bounds: Aabb) -> Self {
    Self {
      root: Node::inner(ROOT_NAME.to_string(), bounds),
      root_is_chunk: false,
    }
  }

  /// Attach `chunk` at the node its name points to, creating inner nodes
  /// on the way down.
  pub fn graft(&mut self, chunk: Node) -> Result<()> {
    let digits = morton::parse_node_name(&chunk.name)
      .ok_or_else(|| OctreeError::Format(format!("invalid chunk name {:?}", chunk.name)))?;
    if self.root_is_chunk {
      return Err(OctreeError::Consistency(format!(
        "chunk {} grafted below the root chunk",
        chunk.name
      )));
    }
    let Some((&last, path)) = digits.split_last() else {
      if !self.root.is_leaf() {
        return Err(OctreeError::Consistency(
          "root chunk grafted over existing chunks".into(),
        ));
      }
      self.root = chunk;
      self.root_is_chunk = true;
      return Ok(());
    };

    let mut node = &mut self.root;
    for &octant in path {
      node = node.child_or_insert(octant);
      if node.subsampled {
        return Err(OctreeError::Consistency(format!(
          "chunk {} nested inside chunk {}",
          chunk.name, node.name
        )));
      }
    }
    node.attach(last, chunk)
  }

  pub fn root(&self) -> &Node {
    &self.root
  }

  pub fn into_root(self) -> Node {
    self.root
  }
}

/// Index, subsample and graft every chunk, then subsample the skeleton.
///
/// Nodes are handed to `on_final` as soon as their point sets are final;
/// the returned root still holds its points.
pub fn stitch_chunks(
  chunks: &ChunkSet,
  config: &BuildConfig,
  stop: &StopSignal,
  subsampler: &mut Subsampler,
  on_final: &mut dyn FnMut(&mut Node) -> Result<()>,
) -> Result<Node> {
  let mut skeleton = Skeleton::new(chunks.root_bounds);
  for chunk in &chunks.chunks {
    stop.check()?;
    let points = load_chunk(&chunk.path, chunk.point_count)?;
    let mut node = index_chunk(chunk.name.clone(), chunk.bounds, points, config)?;
    {
      let _span = tracing::debug_span!("build::subsample", chunk = %chunk.name).entered();
      subsampler.subsample_tree(&mut node, on_final)?;
    }
    skeleton.graft(node)?;
  }
  stop.check()?;

  let mut root = skeleton.into_root();
  let _span = tracing::debug_span!("build::subsample", chunk = "skeleton").entered();
  subsampler.subsample_tree(&mut root, on_final)?;
  Ok(root)
}
