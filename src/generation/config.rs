//! Generator configuration.

use serde::{Deserialize, Serialize};

/// Parameters controlling the whole generation pipeline. Part of the world
/// definition: two worlds with equal configs and seeds are identical.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// World seed.
    pub seed: u32,
    /// FBM octaves for base elevation.
    pub octaves: u32,
    /// FBM persistence (0.5 typical).
    pub persistence: f32,
    /// FBM lacunarity (2.0 typical).
    pub lacunarity: f32,
    /// Base elevation frequency in 1/voxels.
    pub base_frequency: f64,
    /// World height of a heightmap value of 1.0, in voxels.
    pub max_height: f32,
    /// World y below which exposed terrain floods, in voxels.
    pub sea_level: f32,
    /// Hydraulic erosion passes over the LOD-0 heightmap.
    pub erosion_passes: u32,
    /// Droplets simulated per erosion pass.
    pub particles_per_pass: u32,
    /// Accumulated flow above which a cell becomes river.
    pub river_flow_threshold: f32,
    /// Distance in voxels over which latitude swings temperature fully.
    pub latitude_scale: f32,
    /// Temperature lost per unit of latitude (alpha).
    pub temperature_latitude_factor: f32,
    /// Temperature lost per unit of normalized height (beta).
    pub temperature_height_factor: f32,
    /// 3-D noise threshold above which rock is carved to air.
    pub cave_threshold: f32,
    /// Cave noise frequency in 1/voxels.
    pub cave_frequency: f64,
    /// Thickness of the dirt band under the surface block, in voxels.
    pub dirt_depth: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            base_frequency: 1.0 / 900.0,
            max_height: 128.0,
            sea_level: 32.0,
            erosion_passes: 3,
            particles_per_pass: 50_000,
            river_flow_threshold: 90.0,
            latitude_scale: 16_384.0,
            temperature_latitude_factor: 0.5,
            temperature_height_factor: 0.55,
            cave_threshold: 0.58,
            cave_frequency: 1.0 / 48.0,
            dirt_depth: 3.0,
        }
    }
}

impl GeneratorConfig {
    /// Normalized sea level in heightmap units.
    pub fn sea_level_norm(&self) -> f32 {
        self.sea_level / self.max_height
    }
}
