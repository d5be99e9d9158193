//! Two-tier procedural terrain generation.
//!
//! A super-chunk pass produces 512x512 terrain maps (eroded heightmap,
//! biomes, rivers, surface blocks) for a whole region; the voxelizer then
//! extracts any 32^3 chunk from those maps plus volumetric rules (water,
//! caves).

pub mod config;
pub mod noise_field;
pub mod heightmap;
pub mod erosion;
pub mod rivers;
pub mod biomes;
pub mod super_chunk;
pub mod voxelizer;

pub use config::GeneratorConfig;
pub use noise_field::NoiseField;
pub use super_chunk::{SuperChunkGenerator, SuperChunkRecord};
pub use voxelizer::voxelize_chunk;
