//! Meta-grid: coarse occupancy hints for empty-space skipping.
//!
//! A 16^3 grid of 4x4x4-chunk cells centered on the camera. A cell is 0
//! only when every chunk in it is loaded and verified empty; anything
//! unknown stays 1, so the skip can never jump over terrain that merely
//! hasn't loaded yet.

use glam::IVec3;

use crate::streaming::ChunkStreamManager;
use crate::voxel::chunk::{floor_div, ChunkCoord};

/// Cells per grid edge.
pub const META_GRID_SIZE: i32 = 16;
/// Chunks per cell edge.
pub const META_CELL_CHUNKS: i32 = 4;
/// Total cells (16^3).
pub const META_CELL_COUNT: usize = 4096;
/// Chunks per cell (4^3).
const CHUNKS_PER_CELL: u32 = 64;

/// Node count at or below which a chunk counts as empty for skipping.
/// Zero: only the canonical empty chunk qualifies.
pub const META_TRIVIAL_NODES: u32 = 0;

/// The grid plus the cell-space base it is anchored at.
#[derive(Debug, Clone)]
pub struct MetaGrid {
    /// 0 = verified empty region, 1 = possibly non-empty.
    pub cells: Vec<u8>,
    /// Cell-space coordinate of cells[0].
    pub base: IVec3,
}

/// Cell-space base for a camera chunk: the grid covers base .. base + 16.
pub fn grid_base(camera_chunk: ChunkCoord) -> IVec3 {
    IVec3::new(
        floor_div(camera_chunk.x, META_CELL_CHUNKS) - META_GRID_SIZE / 2,
        floor_div(camera_chunk.y, META_CELL_CHUNKS) - META_GRID_SIZE / 2,
        floor_div(camera_chunk.z, META_CELL_CHUNKS) - META_GRID_SIZE / 2,
    )
}

/// Grid index for a chunk coordinate, or None outside the grid.
pub fn cell_index(coord: ChunkCoord, base: IVec3) -> Option<usize> {
    let cx = floor_div(coord.x, META_CELL_CHUNKS) - base.x;
    let cy = floor_div(coord.y, META_CELL_CHUNKS) - base.y;
    let cz = floor_div(coord.z, META_CELL_CHUNKS) - base.z;

    if cx < 0 || cy < 0 || cz < 0
        || cx >= META_GRID_SIZE || cy >= META_GRID_SIZE || cz >= META_GRID_SIZE
    {
        return None;
    }
    Some(((cz * META_GRID_SIZE + cy) * META_GRID_SIZE + cx) as usize)
}

/// Build the grid from the manager's loaded chunks.
pub fn build_meta_grid(manager: &ChunkStreamManager, camera_chunk: ChunkCoord) -> MetaGrid {
    let base = grid_base(camera_chunk);

    // Per cell: how many chunks are loaded, and whether any is non-empty.
    let mut loaded = vec![0u32; META_CELL_COUNT];
    let mut non_empty = vec![false; META_CELL_COUNT];

    for entry in manager.chunks() {
        let Some(idx) = cell_index(entry.coord, base) else {
            continue;
        };
        loaded[idx] += 1;
        let nodes = manager
            .pool()
            .get(entry.pool_id)
            .map(|e| e.dag.node_count)
            .unwrap_or(u32::MAX);
        if nodes > META_TRIVIAL_NODES {
            non_empty[idx] = true;
        }
    }

    let cells = (0..META_CELL_COUNT)
        .map(|i| u8::from(loaded[i] < CHUNKS_PER_CELL || non_empty[i]))
        .collect();

    MetaGrid { cells, base }
}

impl MetaGrid {
    /// Pack 4 cells per u32 for the shader (little-endian byte order).
    pub fn packed(&self) -> Vec<u32> {
        self.cells
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Cell value for a chunk coord; out-of-grid reads as 1 (non-empty).
    pub fn value_for(&self, coord: ChunkCoord) -> u8 {
        cell_index(coord, self.base)
            .map(|i| self.cells[i])
            .unwrap_or(1)
    }
}

/// GPU copy of the packed meta-grid (1024 u32 words) plus its base cell.
pub struct MetaGridBuffer {
    buffer: wgpu::Buffer,
}

impl MetaGridBuffer {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("meta_grid"),
            size: (META_CELL_COUNT / 4 * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer }
    }

    pub fn upload(&self, queue: &wgpu::Queue, grid: &MetaGrid) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&grid.packed()));
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}
