//! Stream voxelizer: extracts a 32^3 block grid from super-chunk maps.
//!
//! Column rules come from the maps (surface height, surface block, river);
//! volumetric rules (ocean fill, cave carving) are evaluated per voxel.

use super::config::GeneratorConfig;
use super::noise_field::NoiseField;
use super::super_chunk::SuperChunkRecord;
use crate::voxel::chunk::{ChunkCoord, VoxelGrid, CHUNK_SIZE, SUPER_CHUNK_SIZE};
use crate::voxel::material::block;

/// Seed salt for the cave noise field.
const CAVE_SALT: u32 = 0x27D4_EB2F;

/// Caves never breach the surface shell: carving starts this far down.
const CAVE_SURFACE_SHELL: f32 = 4.0;

/// Rivers flood the column in a band of this half-height around the surface.
const RIVER_BAND: f32 = 1.0;

/// The volumetric cave field for a world seed.
pub fn cave_field(config: &GeneratorConfig) -> NoiseField {
    NoiseField::new(config.seed ^ CAVE_SALT, 1, 0.5, 2.0, config.cave_frequency)
}

/// Extract the voxel grid for `coord` from its super-chunk record.
///
/// The chunk must lie inside the record's region
/// (`coord.super_chunk() == record.coord`).
pub fn voxelize_chunk(
    record: &SuperChunkRecord,
    config: &GeneratorConfig,
    coord: ChunkCoord,
) -> VoxelGrid {
    debug_assert_eq!(coord.super_chunk(), record.coord);

    let caves = cave_field(config);
    let (ox, oz) = record.coord.world_origin();
    let base_x = coord.x * CHUNK_SIZE as i32 - ox;
    let base_z = coord.z * CHUNK_SIZE as i32 - oz;
    let base_y = coord.y * CHUNK_SIZE as i32;

    debug_assert!(base_x >= 0 && (base_x as u32) < SUPER_CHUNK_SIZE);
    debug_assert!(base_z >= 0 && (base_z as u32) < SUPER_CHUNK_SIZE);

    VoxelGrid::from_fn(|x, y, z| {
        let lx = (base_x + x as i32) as usize;
        let lz = (base_z + z as i32) as usize;
        let wy = (base_y + y as i32) as f32;

        let surface_h = record.height_at(lx, lz) * config.max_height;
        let river = record.is_river(lx, lz);

        if wy >= surface_h {
            // Above ground: river band, then ocean, then sky.
            if river && wy <= surface_h + RIVER_BAND {
                return block::WATER;
            }
            if wy < config.sea_level {
                return block::WATER;
            }
            return block::AIR;
        }

        let depth = surface_h - wy;

        if depth >= CAVE_SURFACE_SHELL {
            let wx = (ox + lx as i32) as f64;
            let wz = (oz + lz as i32) as f64;
            if caves.noise3(wx, wy as f64, wz) > config.cave_threshold {
                return block::AIR;
            }
        }

        if depth <= 1.0 {
            // Rivers carve their bed into water instead of surface blocks.
            if river {
                return block::WATER;
            }
            return record.surface_at(lx, lz) as u32;
        }
        if depth <= 1.0 + config.dirt_depth {
            return block::DIRT;
        }
        block::STONE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::super_chunk::{SuperChunkGenerator, SuperChunkMeta, MAP_RES};
    use crate::generation::heightmap::HeightField;
    use crate::voxel::chunk::SuperChunkCoord;

    /// Record with constant normalized height and uniform surface block.
    fn flat_record(height: f32, surface: u16) -> SuperChunkRecord {
        SuperChunkRecord {
            coord: SuperChunkCoord::new(0, 0),
            height: HeightField::from_fn(MAP_RES, |_, _| height),
            biome: vec![3; MAP_RES * MAP_RES],
            river: vec![0; MAP_RES * MAP_RES],
            surface: vec![surface; MAP_RES * MAP_RES],
            meta: SuperChunkMeta {
                seed: 0,
                sx: 0,
                sz: 0,
                lod0_resolution: 128,
                erosion_passes: 0,
            },
        }
    }

    /// Config whose cave threshold can never be reached.
    fn no_cave_config() -> GeneratorConfig {
        GeneratorConfig {
            cave_threshold: 2.0,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_flat_world_layering() {
        // Surface at world y = 0.5 * 128 = 64: chunk (0, 1, 0) spans 32..64.
        let record = flat_record(0.5, block::GRASS as u16);
        let cfg = no_cave_config();
        let grid = voxelize_chunk(&record, &cfg, ChunkCoord::new(0, 1, 0));

        // y = 31 -> wy = 63, depth 1: surface block.
        assert_eq!(grid.get(5, 31, 5), block::GRASS);
        // wy = 61, depth 3: dirt band.
        assert_eq!(grid.get(5, 29, 5), block::DIRT);
        // wy = 40, depth 24: stone.
        assert_eq!(grid.get(5, 8, 5), block::STONE);
    }

    #[test]
    fn test_air_above_surface() {
        let record = flat_record(0.5, block::GRASS as u16);
        let cfg = no_cave_config();
        // Chunk above the surface (y = 64..96), above sea level.
        let grid = voxelize_chunk(&record, &cfg, ChunkCoord::new(0, 2, 0));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_ocean_fill() {
        // Sea floor at wy = 12.8, sea level 32: chunk 0 floods from floor up.
        let record = flat_record(0.1, block::SAND as u16);
        let cfg = no_cave_config();
        let grid = voxelize_chunk(&record, &cfg, ChunkCoord::new(0, 0, 0));

        assert_eq!(grid.get(0, 20, 0), block::WATER);
        assert_eq!(grid.get(0, 31, 0), block::WATER);
        // Sea floor surface block under the water column.
        assert_eq!(grid.get(0, 12, 0), block::SAND);
        assert_eq!(grid.get(0, 2, 0), block::STONE);
    }

    #[test]
    fn test_river_band_floods() {
        let mut record = flat_record(0.5, block::GRASS as u16);
        record.river.fill(1);
        let cfg = no_cave_config();
        let grid = voxelize_chunk(&record, &cfg, ChunkCoord::new(0, 1, 0));

        // Surface cell becomes river water; the band extends one voxel up.
        assert_eq!(grid.get(5, 31, 5), block::WATER);
        // Below the bed, normal strata resume.
        assert_eq!(grid.get(5, 28, 5), block::DIRT);
    }

    #[test]
    fn test_seam_between_adjacent_chunks() {
        // Same record, uniform height: the boundary columns of neighboring
        // chunks must agree exactly.
        let record = flat_record(0.37, block::GRASS as u16);
        let cfg = no_cave_config();
        let a = voxelize_chunk(&record, &cfg, ChunkCoord::new(0, 0, 0));
        let b = voxelize_chunk(&record, &cfg, ChunkCoord::new(1, 0, 0));

        for z in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                // Columns one voxel apart on a flat record carry the same
                // strata.
                assert_eq!(a.get(31, y, z), b.get(0, y, z));
            }
        }
    }

    #[test]
    fn test_deterministic_with_real_record() {
        let cfg = GeneratorConfig {
            erosion_passes: 1,
            particles_per_pass: 1_000,
            ..GeneratorConfig::default()
        };
        let record = SuperChunkGenerator::new(cfg.clone()).generate(SuperChunkCoord::new(0, 0));
        let coord = ChunkCoord::new(3, 1, 7);

        let a = voxelize_chunk(&record, &cfg, coord);
        let b = voxelize_chunk(&record, &cfg, coord);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_caves_carve_deep_rock() {
        let record = flat_record(0.9, block::STONE as u16);
        let cfg = GeneratorConfig {
            cave_threshold: -0.1, // carve aggressively
            ..GeneratorConfig::default()
        };
        // Deep chunk, well below the surface shell.
        let grid = voxelize_chunk(&record, &cfg, ChunkCoord::new(0, 0, 0));
        let carved = (0..CHUNK_SIZE)
            .flat_map(|z| (0..CHUNK_SIZE).map(move |x| (x, z)))
            .any(|(x, z)| (0..CHUNK_SIZE).any(|y| grid.get(x, y, z) == block::AIR));
        assert!(carved);
    }
}
