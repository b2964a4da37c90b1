use std::path::PathBuf;
use thiserror::Error;

/// Failures that prevent metadata from being read at all.
///
/// A file that simply carries no EXIF block is not an error; readers report
/// that as `Ok(None)`.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The source file could not be opened or read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MetaError::Io { path: path.into(), source }
    }
}
