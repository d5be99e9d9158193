//! Client-side chunk streaming: pattern-deduplicating pool and the
//! per-frame chunk manager.

pub mod pool;
pub mod manager;

pub use manager::{ChunkStreamManager, Completion, StreamingConfig};
pub use pool::{PoolId, SvdagPool};
