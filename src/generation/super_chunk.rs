//! Super-chunk generation: the 512x512 terrain-map stage.
//!
//! One record per (sx, sz) region holds everything the voxelizer needs to
//! extract any of the region's chunks: the eroded heightmap, biome map,
//! river map, and surface-block map. Records are deterministic in
//! (seed, coord) and independent of generation order.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::biomes::{self, Biome};
use super::config::GeneratorConfig;
use super::erosion::{self, ErosionParams};
use super::heightmap::HeightField;
use super::noise_field::NoiseField;
use super::rivers;
use crate::voxel::chunk::SuperChunkCoord;

/// Resolution of the 512x512 output maps (one cell per world voxel).
pub const MAP_RES: usize = 512;

/// Resolution of the coarse stage the erosion runs on.
pub const LOD0_RES: usize = 128;

/// World-space stride of one LOD-0 cell.
const LOD0_STRIDE: f64 = (MAP_RES / LOD0_RES) as f64;

/// Normalized height above which river water no longer pools.
const RIVER_SNOW_LINE: f32 = 0.8;

/// Seed salts for the independent noise fields.
const EROSION_MOISTURE_SALT: u32 = 0x9E37_79B9;
const BIOME_MOISTURE_SALT: u32 = 0x85EB_CA6B;
const CLIMATE_SALT: u32 = 0xC2B2_AE35;

/// Identifying metadata stored alongside the map files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperChunkMeta {
    pub seed: u32,
    pub sx: i32,
    pub sz: i32,
    pub lod0_resolution: u32,
    pub erosion_passes: u32,
}

/// The four terrain maps for one 512x512 region.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperChunkRecord {
    pub coord: SuperChunkCoord,
    /// Normalized surface height in [0, 1]; world y = height * max_height.
    pub height: HeightField,
    /// Biome IDs (see `biomes::Biome`).
    pub biome: Vec<u8>,
    /// 1 where a river crosses the cell.
    pub river: Vec<u8>,
    /// Surface block per cell.
    pub surface: Vec<u16>,
    pub meta: SuperChunkMeta,
}

impl SuperChunkRecord {
    #[inline]
    fn index(lx: usize, lz: usize) -> usize {
        debug_assert!(lx < MAP_RES && lz < MAP_RES);
        lz * MAP_RES + lx
    }

    /// Normalized height at local map coordinates.
    #[inline]
    pub fn height_at(&self, lx: usize, lz: usize) -> f32 {
        self.height.get(lx, lz)
    }

    #[inline]
    pub fn biome_at(&self, lx: usize, lz: usize) -> Biome {
        Biome::from_u8(self.biome[Self::index(lx, lz)])
    }

    #[inline]
    pub fn is_river(&self, lx: usize, lz: usize) -> bool {
        self.river[Self::index(lx, lz)] != 0
    }

    #[inline]
    pub fn surface_at(&self, lx: usize, lz: usize) -> u16 {
        self.surface[Self::index(lx, lz)]
    }
}

/// Produces super-chunk records for a fixed configuration.
pub struct SuperChunkGenerator {
    config: GeneratorConfig,
    base: NoiseField,
    erosion_moisture: NoiseField,
    biome_moisture: NoiseField,
    climate: NoiseField,
}

impl SuperChunkGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let base = NoiseField::new(
            config.seed,
            config.octaves,
            config.persistence as f64,
            config.lacunarity as f64,
            config.base_frequency,
        );
        // Erosion weighting samples a slightly denser field so wet valleys
        // don't simply mirror the elevation.
        let erosion_moisture = NoiseField::new(
            config.seed ^ EROSION_MOISTURE_SALT,
            config.octaves,
            config.persistence as f64,
            config.lacunarity as f64,
            config.base_frequency * 1.7,
        );
        let biome_moisture = NoiseField::new(
            config.seed ^ BIOME_MOISTURE_SALT,
            config.octaves,
            config.persistence as f64,
            config.lacunarity as f64,
            config.base_frequency * 0.8,
        );
        let climate = NoiseField::new(
            config.seed ^ CLIMATE_SALT,
            2,
            0.5,
            2.0,
            config.base_frequency * 0.5,
        );

        Self { config, base, erosion_moisture, biome_moisture, climate }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate the record for one super-chunk.
    pub fn generate(&self, coord: SuperChunkCoord) -> SuperChunkRecord {
        let start = Instant::now();
        let (ox, oz) = coord.world_origin();
        let cfg = &self.config;

        // Stage 1: base elevation at LOD-0.
        let mut lod0 = HeightField::from_fn(LOD0_RES, |x, z| {
            self.base.fbm2(
                ox as f64 + x as f64 * LOD0_STRIDE,
                oz as f64 + z as f64 * LOD0_STRIDE,
            )
        });

        // Stage 2: moisture used only to weight erosion.
        let erosion_wetness = HeightField::from_fn(LOD0_RES, |x, z| {
            self.erosion_moisture.fbm2(
                ox as f64 + x as f64 * LOD0_STRIDE,
                oz as f64 + z as f64 * LOD0_STRIDE,
            )
        });

        // Stage 3: hydraulic erosion on the coarse grid.
        erosion::erode(
            &mut lod0,
            &erosion_wetness,
            cfg.seed,
            cfg.erosion_passes,
            cfg.particles_per_pass,
            &ErosionParams::default(),
        );

        // Stage 4: independent moisture field that drives biomes.
        let biome_wetness = HeightField::from_fn(LOD0_RES, |x, z| {
            self.biome_moisture.fbm2(
                ox as f64 + x as f64 * LOD0_STRIDE,
                oz as f64 + z as f64 * LOD0_STRIDE,
            )
        });

        // Stage 5: upscale to full map resolution.
        let height = lod0.upscale_bicubic(MAP_RES / LOD0_RES);
        let moisture = biome_wetness.upscale_bicubic(MAP_RES / LOD0_RES);

        // Stage 6: rivers from flow accumulation.
        let river = rivers::river_mask(&height, cfg.river_flow_threshold, RIVER_SNOW_LINE);

        // Stages 7-9: temperature, biome, surface block per cell.
        let mut biome = vec![0u8; MAP_RES * MAP_RES];
        let mut surface = vec![0u16; MAP_RES * MAP_RES];
        for lz in 0..MAP_RES {
            for lx in 0..MAP_RES {
                let idx = lz * MAP_RES + lx;
                let h = height.get(lx, lz);
                let wx = ox as f64 + lx as f64;
                let wz = oz as f64 + lz as f64;

                let temp = biomes::temperature(
                    wz,
                    h,
                    self.climate.noise2(wx, wz),
                    cfg.latitude_scale,
                    cfg.temperature_latitude_factor,
                    cfg.temperature_height_factor,
                );
                let b = biomes::classify(h, temp, moisture.get(lx, lz), cfg.sea_level_norm());
                biome[idx] = b as u8;
                surface[idx] = b.surface_block() as u16;
            }
        }

        log::info!(
            "superchunk ({}, {}) generated in {:.1} ms",
            coord.x,
            coord.z,
            start.elapsed().as_secs_f64() * 1000.0,
        );

        SuperChunkRecord {
            coord,
            height,
            biome,
            river,
            surface,
            meta: SuperChunkMeta {
                seed: cfg.seed,
                sx: coord.x,
                sz: coord.z,
                lod0_resolution: LOD0_RES as u32,
                erosion_passes: cfg.erosion_passes,
            },
        }
    }
}
