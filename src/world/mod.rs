//! Server-side world plumbing: disk caches and the chunk service.

pub mod cache;
pub mod service;

pub use cache::{ChunkStore, SuperChunkStore};
pub use service::{Manifest, WorldConfig, WorldService};
