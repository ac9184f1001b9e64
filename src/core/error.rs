use std::io;

use thiserror::Error;

/// Failure to reconstruct a network from persisted state.
///
/// The caller keeps its current network (or builds a fresh one) on error.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad network image magic")]
    BadMagic,

    #[error("unsupported network image version {0}")]
    UnsupportedVersion(u32),

    #[error("network image is missing the {0} chunk")]
    MissingChunk(&'static str),

    #[error("incompatible topology: {0}")]
    Shape(String),

    #[error("unknown activation tag {0}")]
    UnknownActivation(u8),
}
