//! Voxel data structures: chunks, materials, SVDAG storage

pub mod chunk;
pub mod material;
pub mod svdag;

pub use chunk::{ChunkCoord, SuperChunkCoord, VoxelGrid, CHUNK_SIZE, CHUNK_VOLUME};
pub use material::block;
