//! Block IDs and the material table.
//!
//! Block ID 0 is air. Transparency is a shading flag only: transparent
//! blocks (water, ice) occlude nothing and the ray-marcher accumulates
//! through them.

use serde::Serialize;

/// Well-known block IDs produced by the generator.
pub mod block {
    pub const AIR: u32 = 0;
    pub const GRASS: u32 = 1;
    pub const DIRT: u32 = 2;
    pub const STONE: u32 = 3;
    pub const WATER: u32 = 4;
    pub const SAND: u32 = 5;
    pub const SNOW: u32 = 6;
    pub const GRAVEL: u32 = 7;
    pub const BEDROCK: u32 = 8;
    pub const ICE: u32 = 9;
}

/// One entry of the material table, serialized into the world manifest.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Material {
    pub id: u32,
    pub name: &'static str,
    pub transparent: bool,
}

/// The fixed material table. Index != id for air-relative lookups; use
/// `material_for`.
pub const MATERIALS: &[Material] = &[
    Material { id: block::GRASS, name: "grass", transparent: false },
    Material { id: block::DIRT, name: "dirt", transparent: false },
    Material { id: block::STONE, name: "stone", transparent: false },
    Material { id: block::WATER, name: "water", transparent: true },
    Material { id: block::SAND, name: "sand", transparent: false },
    Material { id: block::SNOW, name: "snow", transparent: false },
    Material { id: block::GRAVEL, name: "gravel", transparent: false },
    Material { id: block::BEDROCK, name: "bedrock", transparent: false },
    Material { id: block::ICE, name: "ice", transparent: true },
];

/// Look up a material by block ID.
pub fn material_for(id: u32) -> Option<&'static Material> {
    MATERIALS.iter().find(|m| m.id == id)
}

/// Whether a block is see-through for occlusion purposes. Air and unknown
/// IDs count as transparent so bad data degrades to a miss, never a wall.
pub fn is_transparent(id: u32) -> bool {
    if id == block::AIR {
        return true;
    }
    material_for(id).map(|m| m.transparent).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_transparent() {
        assert!(is_transparent(block::AIR));
    }

    #[test]
    fn test_water_transparent_stone_not() {
        assert!(is_transparent(block::WATER));
        assert!(!is_transparent(block::STONE));
    }

    #[test]
    fn test_unknown_id_is_transparent() {
        assert!(is_transparent(0xDEAD));
    }

    #[test]
    fn test_table_has_no_air_entry() {
        assert!(MATERIALS.iter().all(|m| m.id != block::AIR));
    }
}
