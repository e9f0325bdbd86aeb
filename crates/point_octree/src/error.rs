//! Error taxonomy shared by the build pipeline and the runtime loader.

use std::io;
use std::path::PathBuf;

/// Errors raised while building or streaming an octree.
///
/// Build-time errors abort the whole pipeline. Runtime errors are isolated
/// to the node that produced them.
#[derive(Debug, thiserror::Error)]
pub enum OctreeError {
  /// A file could not be opened, read, or written.
  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Routing, count, or descendant-count mismatch. Never auto-corrected.
  #[error("consistency error: {0}")]
  Consistency(String),

  /// Data path that is recognised but not implemented.
  #[error("unsupported: {0}")]
  Unsupported(String),

  /// Truncated or malformed persisted data.
  #[error("format error: {0}")]
  Format(String),

  /// Invalid configuration value or unparsable config file.
  #[error("config error: {0}")]
  Config(String),

  /// A stop signal was observed before the phase finished.
  #[error("operation cancelled")]
  Cancelled,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OctreeError>;

impl OctreeError {
  /// Wrap an `io::Error` with the path it happened on.
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  /// True for errors that indicate a bucketing or serialization defect.
  pub fn is_consistency(&self) -> bool {
    matches!(self, Self::Consistency(_))
  }
}

/// Attach a path to `io::Result`s.
pub(crate) trait IoContext<T> {
  fn at_path(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
  fn at_path(self, path: &std::path::Path) -> Result<T> {
    self.map_err(|source| OctreeError::io(path, source))
  }
}
