//! Chunk and super-chunk coordinates plus the dense voxel grid.
//!
//! A chunk covers 32x32x32 world voxels. A super-chunk is a 512x512 column
//! in world (x, z) shared by the 16x16 chunk columns inside it; height is not
//! subdivided at the super-chunk tier.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Edge length of a chunk in voxels.
pub const CHUNK_SIZE: u32 = 32;

/// Voxels per chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Edge length of a super-chunk in world voxels (x and z only).
pub const SUPER_CHUNK_SIZE: u32 = 512;

/// Chunk columns per super-chunk edge (512 / 32).
pub const CHUNKS_PER_SUPER_CHUNK: i32 = 16;

/// The one voxel indexing convention, shared by the generator, the SVDAG
/// builder, and the ray-march kernel: idx = z*1024 + y*32 + x.
#[inline]
pub fn voxel_index(x: u32, y: u32, z: u32) -> usize {
    debug_assert!(x < CHUNK_SIZE && y < CHUNK_SIZE && z < CHUNK_SIZE);
    (z * CHUNK_SIZE * CHUNK_SIZE + y * CHUNK_SIZE + x) as usize
}

/// Floored integer division (rounds toward negative infinity).
#[inline]
pub fn floor_div(a: i32, b: i32) -> i32 {
    let d = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) { d - 1 } else { d }
}

/// Coordinate of a chunk in the infinite chunk grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// World-space origin of this chunk (minimum corner).
    pub fn world_origin(&self) -> Vec3 {
        Vec3::new(
            self.x as f32 * CHUNK_SIZE as f32,
            self.y as f32 * CHUNK_SIZE as f32,
            self.z as f32 * CHUNK_SIZE as f32,
        )
    }

    /// World-space center of this chunk.
    pub fn world_center(&self) -> Vec3 {
        self.world_origin() + Vec3::splat(CHUNK_SIZE as f32 * 0.5)
    }

    /// Chunk containing a world position.
    pub fn from_world_pos(pos: Vec3) -> Self {
        Self {
            x: (pos.x / CHUNK_SIZE as f32).floor() as i32,
            y: (pos.y / CHUNK_SIZE as f32).floor() as i32,
            z: (pos.z / CHUNK_SIZE as f32).floor() as i32,
        }
    }

    /// The super-chunk whose terrain maps voxelize this chunk.
    pub fn super_chunk(&self) -> SuperChunkCoord {
        SuperChunkCoord {
            x: floor_div(self.x, CHUNKS_PER_SUPER_CHUNK),
            z: floor_div(self.z, CHUNKS_PER_SUPER_CHUNK),
        }
    }

    /// Squared distance between chunk centers, in chunks.
    pub fn distance_sq(&self, other: ChunkCoord) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dy * dy + dz * dz
    }
}

/// Coordinate of a super-chunk: a 512x512 region in world (x, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuperChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl SuperChunkCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// World-space (x, z) of the minimum corner.
    pub fn world_origin(&self) -> (i32, i32) {
        (
            self.x * SUPER_CHUNK_SIZE as i32,
            self.z * SUPER_CHUNK_SIZE as i32,
        )
    }
}

/// Dense 32^3 block-ID grid, the voxelizer output and SVDAG builder input.
#[derive(Clone)]
pub struct VoxelGrid {
    blocks: Box<[u32; CHUNK_VOLUME]>,
}

impl VoxelGrid {
    /// All-air grid.
    pub fn new() -> Self {
        Self {
            blocks: vec![0u32; CHUNK_VOLUME].into_boxed_slice().try_into().unwrap(),
        }
    }

    /// Build a grid by evaluating `f(x, y, z)` for every voxel.
    pub fn from_fn(mut f: impl FnMut(u32, u32, u32) -> u32) -> Self {
        let mut grid = Self::new();
        for z in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    grid.blocks[voxel_index(x, y, z)] = f(x, y, z);
                }
            }
        }
        grid
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> u32 {
        self.blocks[voxel_index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, z: u32, block: u32) {
        self.blocks[voxel_index(x, y, z)] = block;
    }

    /// True if every voxel is air.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }

    /// Raw block slice in idx = z*1024 + y*32 + x order.
    pub fn as_slice(&self) -> &[u32] {
        &self.blocks[..]
    }
}

impl Default for VoxelGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voxel_index_convention() {
        assert_eq!(voxel_index(0, 0, 0), 0);
        assert_eq!(voxel_index(1, 0, 0), 1);
        assert_eq!(voxel_index(0, 1, 0), 32);
        assert_eq!(voxel_index(0, 0, 1), 1024);
        assert_eq!(voxel_index(31, 31, 31), CHUNK_VOLUME - 1);
    }

    #[test]
    fn test_floor_div() {
        assert_eq!(floor_div(0, 16), 0);
        assert_eq!(floor_div(15, 16), 0);
        assert_eq!(floor_div(16, 16), 1);
        assert_eq!(floor_div(-1, 16), -1);
        assert_eq!(floor_div(-16, 16), -1);
        assert_eq!(floor_div(-17, 16), -2);
    }

    #[test]
    fn test_super_chunk_mapping() {
        assert_eq!(ChunkCoord::new(0, 5, 0).super_chunk(), SuperChunkCoord::new(0, 0));
        assert_eq!(ChunkCoord::new(15, 0, 15).super_chunk(), SuperChunkCoord::new(0, 0));
        assert_eq!(ChunkCoord::new(16, 0, 0).super_chunk(), SuperChunkCoord::new(1, 0));
        assert_eq!(ChunkCoord::new(-1, 0, -17).super_chunk(), SuperChunkCoord::new(-1, -2));
    }

    #[test]
    fn test_world_origin() {
        let coord = ChunkCoord::new(1, -2, 3);
        assert_eq!(coord.world_origin(), Vec3::new(32.0, -64.0, 96.0));
    }

    #[test]
    fn test_grid_get_set() {
        let mut grid = VoxelGrid::new();
        assert!(grid.is_empty());
        grid.set(3, 7, 12, 42);
        assert_eq!(grid.get(3, 7, 12), 42);
        assert_eq!(grid.as_slice()[12 * 1024 + 7 * 32 + 3], 42);
        assert!(!grid.is_empty());
    }
}
