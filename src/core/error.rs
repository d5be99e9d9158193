//! Error types for the Terravox engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] crate::voxel::svdag::codec::CodecError),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("unknown world: {0}")]
    UnknownWorld(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("streaming error: {0}")]
    Streaming(String),
}

impl Error {
    /// Stable machine-readable kind, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Codec(e) => e.kind(),
            Error::Gpu(_) => "GpuError",
            Error::UnknownWorld(_) => "ChunkNotFound",
            Error::InvalidCoordinate(_) => "InvalidCoordinate",
            Error::Generation(_) => "GenerationFailed",
            Error::Streaming(_) => "StreamingError",
        }
    }
}
