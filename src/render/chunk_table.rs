//! Chunk metadata table and the GPU spatial hash.
//!
//! Loaded chunks upload as one dense metadata array plus pooled node and
//! leaf buffers (patterns shared by many chunks upload once). The spatial
//! hash maps a chunk coordinate to its metadata index with open addressing
//! and linear probing; the shader runs the identical hash, probe order,
//! and sentinel.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::streaming::{ChunkStreamManager, PoolId};
use crate::voxel::chunk::{ChunkCoord, CHUNK_SIZE};

/// Empty hash slot.
pub const HASH_SENTINEL: u32 = 0xFFFF_FFFF;

/// Probe chain bound shared with the shader; longer chains read as miss.
pub const MAX_PROBE: u32 = 32;

/// Hash table load target: size >= 2.7x the chunk soft cap.
pub const TABLE_LOAD_FACTOR: f32 = 2.7;

// Large odd primes, one per axis.
const HASH_PX: u32 = 73_856_093;
const HASH_PY: u32 = 19_349_663;
const HASH_PZ: u32 = 83_492_791;

/// Per-chunk GPU metadata, 32 bytes, matching the WGSL struct word for
/// word. Every index field is u32; the two trailing words carry the
/// chunk's base offsets into the pooled node/leaf buffers.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ChunkMeta {
    pub world_offset: [f32; 3],
    pub chunk_size: f32,
    /// Absolute root offset into the pooled node buffer.
    pub root_index: u32,
    /// Logical node count; 0 marks a known-empty chunk.
    pub node_count: u32,
    /// Base of this chunk's pattern in the pooled node buffer. Child
    /// references inside the pattern are relative to this.
    pub nodes_base: u32,
    /// Base of this chunk's pattern in the pooled leaf buffer.
    pub leaves_base: u32,
}

/// CPU-built GPU state: everything the ray-march kernel binds.
#[derive(Debug, Default)]
pub struct GpuChunkSet {
    pub metas: Vec<ChunkMeta>,
    /// Chunk coords parallel to `metas` (CPU bookkeeping only).
    pub coords: Vec<ChunkCoord>,
    /// Concatenated pooled node words.
    pub nodes: Vec<u32>,
    /// Concatenated pooled leaf words.
    pub leaves: Vec<u32>,
    /// Open-addressed spatial hash: metadata index or sentinel.
    pub hash_table: Vec<u32>,
}

/// Hash table size for a soft cap: next power of two >= 2.7x.
pub fn table_size_for(soft_cap: usize) -> u32 {
    let min = (soft_cap as f32 * TABLE_LOAD_FACTOR).ceil() as u32;
    min.next_power_of_two()
}

/// The shared spatial hash. Table size must be a power of two.
#[inline]
pub fn hash_slot(coord: ChunkCoord, table_size: u32) -> u32 {
    let h = (coord.x as u32).wrapping_mul(HASH_PX)
        ^ (coord.y as u32).wrapping_mul(HASH_PY)
        ^ (coord.z as u32).wrapping_mul(HASH_PZ);
    h & (table_size - 1)
}

/// Build the hash table over a metadata array. Chunks whose probe chain
/// exceeds MAX_PROBE are left out; the shader then treats them as missing
/// and re-requests, which is the saturation recovery path.
pub fn build_hash_table(coords: &[ChunkCoord], table_size: u32) -> Vec<u32> {
    debug_assert!(table_size.is_power_of_two());
    let mut table = vec![HASH_SENTINEL; table_size as usize];

    for (chunk_index, &coord) in coords.iter().enumerate() {
        let start = hash_slot(coord, table_size);
        let mut placed = false;
        for probe in 0..MAX_PROBE {
            let slot = ((start + probe) & (table_size - 1)) as usize;
            if table[slot] == HASH_SENTINEL {
                table[slot] = chunk_index as u32;
                placed = true;
                break;
            }
        }
        if !placed {
            log::warn!(
                "hash table saturated at ({}, {}, {}); chunk will re-request",
                coord.x, coord.y, coord.z
            );
        }
    }

    table
}

/// Look up a chunk's metadata index, verifying the coordinate against the
/// metadata array exactly as the shader does.
pub fn lookup(set: &GpuChunkSet, coord: ChunkCoord) -> Option<u32> {
    let table_size = set.hash_table.len() as u32;
    if table_size == 0 {
        return None;
    }
    let start = hash_slot(coord, table_size);
    let expected = coord.world_origin();

    for probe in 0..MAX_PROBE {
        let slot = ((start + probe) & (table_size - 1)) as usize;
        let entry = set.hash_table[slot];
        if entry == HASH_SENTINEL {
            return None;
        }
        let meta = &set.metas[entry as usize];
        if meta.world_offset == [expected.x, expected.y, expected.z] {
            return Some(entry);
        }
    }
    None
}

/// Flatten the manager's loaded chunks and pool into GPU-uploadable
/// arrays. Patterns upload once; chunks reference them by base offset.
/// Output ordering is deterministic (coords sorted) so identical state
/// produces identical buffers.
pub fn build_chunk_set(manager: &ChunkStreamManager, table_size: u32) -> GpuChunkSet {
    let mut nodes = Vec::new();
    let mut leaves = Vec::new();
    let mut bases: HashMap<PoolId, (u32, u32)> = HashMap::new();

    let mut pool_ids: Vec<PoolId> = manager.pool().iter().map(|(id, _)| id).collect();
    pool_ids.sort_unstable();
    for id in pool_ids {
        let entry = manager.pool().get(id).expect("live pool id");
        let base = (nodes.len() as u32, leaves.len() as u32);
        nodes.extend_from_slice(&entry.dag.nodes);
        leaves.extend_from_slice(&entry.dag.leaves);
        bases.insert(id, base);
    }

    let mut entries: Vec<(ChunkCoord, PoolId)> =
        manager.chunks().map(|e| (e.coord, e.pool_id)).collect();
    entries.sort_unstable_by_key(|(c, _)| (c.x, c.y, c.z));
    let coords: Vec<ChunkCoord> = entries.iter().map(|(c, _)| *c).collect();

    let mut metas = Vec::with_capacity(entries.len());
    for &(coord, pool_id) in &entries {
        let (nodes_base, leaves_base) = bases[&pool_id];
        let dag = &manager.pool().get(pool_id).expect("live pool id").dag;
        let origin = coord.world_origin();

        metas.push(ChunkMeta {
            world_offset: [origin.x, origin.y, origin.z],
            chunk_size: CHUNK_SIZE as f32,
            root_index: nodes_base + dag.root,
            node_count: dag.node_count,
            nodes_base,
            leaves_base,
        });
    }

    let hash_table = build_hash_table(&coords, table_size);

    GpuChunkSet { metas, coords, nodes, leaves, hash_table }
}

/// Owns the wgpu buffers behind a `GpuChunkSet` and the world-data bind
/// group. Buffers grow geometrically; the bind group is rebuilt whenever
/// a buffer is reallocated.
pub struct ChunkTableBuffers {
    meta_buffer: wgpu::Buffer,
    nodes_buffer: wgpu::Buffer,
    leaves_buffer: wgpu::Buffer,
    hash_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

fn storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(4),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn read_only_storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ChunkTableBuffers {
    pub fn new(device: &wgpu::Device, soft_cap: usize) -> Self {
        let table_size = table_size_for(soft_cap) as u64;
        let meta_buffer = storage_buffer(
            device,
            "chunk_meta",
            soft_cap as u64 * std::mem::size_of::<ChunkMeta>() as u64,
        );
        let nodes_buffer = storage_buffer(device, "svdag_nodes", 1 << 20);
        let leaves_buffer = storage_buffer(device, "svdag_leaves", 1 << 16);
        let hash_buffer = storage_buffer(device, "chunk_hash_table", table_size * 4);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("world_data_layout"),
            entries: &[
                read_only_storage_entry(0),
                read_only_storage_entry(1),
                read_only_storage_entry(2),
                read_only_storage_entry(3),
            ],
        });

        let bind_group = Self::make_bind_group(
            device,
            &bind_group_layout,
            &meta_buffer,
            &nodes_buffer,
            &leaves_buffer,
            &hash_buffer,
        );

        Self {
            meta_buffer,
            nodes_buffer,
            leaves_buffer,
            hash_buffer,
            bind_group_layout,
            bind_group,
        }
    }

    fn make_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        metas: &wgpu::Buffer,
        nodes: &wgpu::Buffer,
        leaves: &wgpu::Buffer,
        hash: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("world_data_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: metas.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: nodes.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: leaves.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: hash.as_entire_binding() },
            ],
        })
    }

    /// Upload a freshly built chunk set, growing buffers as needed.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, set: &GpuChunkSet) {
        let mut rebound = false;
        rebound |= Self::ensure_capacity(
            device,
            &mut self.meta_buffer,
            "chunk_meta",
            (set.metas.len() * std::mem::size_of::<ChunkMeta>()) as u64,
        );
        rebound |= Self::ensure_capacity(
            device,
            &mut self.nodes_buffer,
            "svdag_nodes",
            (set.nodes.len() * 4) as u64,
        );
        rebound |= Self::ensure_capacity(
            device,
            &mut self.leaves_buffer,
            "svdag_leaves",
            (set.leaves.len() * 4) as u64,
        );
        rebound |= Self::ensure_capacity(
            device,
            &mut self.hash_buffer,
            "chunk_hash_table",
            (set.hash_table.len() * 4) as u64,
        );

        if rebound {
            self.bind_group = Self::make_bind_group(
                device,
                &self.bind_group_layout,
                &self.meta_buffer,
                &self.nodes_buffer,
                &self.leaves_buffer,
                &self.hash_buffer,
            );
        }

        if !set.metas.is_empty() {
            queue.write_buffer(&self.meta_buffer, 0, bytemuck::cast_slice(&set.metas));
        }
        if !set.nodes.is_empty() {
            queue.write_buffer(&self.nodes_buffer, 0, bytemuck::cast_slice(&set.nodes));
        }
        if !set.leaves.is_empty() {
            queue.write_buffer(&self.leaves_buffer, 0, bytemuck::cast_slice(&set.leaves));
        }
        queue.write_buffer(&self.hash_buffer, 0, bytemuck::cast_slice(&set.hash_table));

        log::debug!(
            "chunk table upload: {} chunks, {} node words, {} leaf words",
            set.metas.len(),
            set.nodes.len(),
            set.leaves.len(),
        );
    }

    fn ensure_capacity(
        device: &wgpu::Device,
        buffer: &mut wgpu::Buffer,
        label: &str,
        needed: u64,
    ) -> bool {
        if buffer.size() >= needed {
            return false;
        }
        *buffer = storage_buffer(device, label, needed.next_power_of_two());
        true
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::StreamingConfig;
    use crate::voxel::chunk::VoxelGrid;
    use crate::voxel::svdag::{codec, EncodedChunk, SvdagBuilder};
    use glam::Vec3;

    fn encoded(f: impl FnMut(u32, u32, u32) -> u32) -> Vec<u8> {
        let dag = SvdagBuilder::new().build(&VoxelGrid::from_fn(f));
        codec::encode(&EncodedChunk::material_only(dag))
    }

    fn loaded_manager(coords: &[ChunkCoord], bytes: &[u8]) -> ChunkStreamManager {
        let mut mgr = ChunkStreamManager::new(StreamingConfig::default());
        for &coord in coords {
            mgr.request(coord);
            mgr.on_received(coord, bytes, Vec3::ZERO);
        }
        mgr
    }

    #[test]
    fn test_meta_is_32_bytes() {
        assert_eq!(std::mem::size_of::<ChunkMeta>(), 32);
    }

    #[test]
    fn test_table_size_for_soft_cap() {
        // 3000 * 2.7 = 8100 -> 8192.
        assert_eq!(table_size_for(3000), 8192);
        assert_eq!(table_size_for(100), 512);
    }

    #[test]
    fn test_lookup_hits_and_misses() {
        let coords: Vec<ChunkCoord> = (0..50)
            .map(|i| ChunkCoord::new(i % 7, i / 7, -i))
            .collect();
        let set = {
            let mgr = loaded_manager(&coords, &encoded(|_, _, _| 1));
            build_chunk_set(&mgr, 512)
        };

        for coord in &coords {
            let idx = lookup(&set, *coord).expect("loaded chunk must be found");
            assert_eq!(set.coords[idx as usize], *coord);
        }
        assert!(lookup(&set, ChunkCoord::new(100, 100, 100)).is_none());
    }

    #[test]
    fn test_lookup_within_probe_bound() {
        // Tiny table to force clustering; every placed chunk must still be
        // found within MAX_PROBE.
        let coords: Vec<ChunkCoord> = (0..24).map(|i| ChunkCoord::new(i, 0, 0)).collect();
        let mgr = loaded_manager(&coords, &encoded(|_, _, _| 1));
        let set = build_chunk_set(&mgr, 32);

        let found = coords.iter().filter(|c| lookup(&set, **c).is_some()).count();
        let placed = set.hash_table.iter().filter(|&&e| e != HASH_SENTINEL).count();
        assert_eq!(found, placed);
    }

    #[test]
    fn test_shared_pattern_uploads_once() {
        let coords: Vec<ChunkCoord> = (0..10).map(|i| ChunkCoord::new(i, 0, 0)).collect();
        let bytes = encoded(|_, y, _| u32::from(y < 4) * 3);
        let mgr = loaded_manager(&coords, &bytes);
        let set = build_chunk_set(&mgr, 512);

        let dag = SvdagBuilder::new().build(&VoxelGrid::from_fn(|_, y, _| u32::from(y < 4) * 3));
        // One pattern's worth of words despite 10 chunks.
        assert_eq!(set.nodes.len(), dag.nodes.len());
        assert_eq!(set.leaves.len(), dag.leaves.len());
        assert_eq!(set.metas.len(), 10);
        assert!(set.metas.iter().all(|m| m.nodes_base == 0 && m.leaves_base == 0));
        assert!(set.metas.iter().all(|m| m.root_index == dag.root));
    }

    #[test]
    fn test_distinct_patterns_get_distinct_bases() {
        let a = ChunkCoord::new(0, 0, 0);
        let b = ChunkCoord::new(1, 0, 0);
        let mut mgr = ChunkStreamManager::new(StreamingConfig::default());
        mgr.request(a);
        mgr.on_received(a, &encoded(|_, _, _| 1), Vec3::ZERO);
        mgr.request(b);
        mgr.on_received(b, &encoded(|_, _, _| 2), Vec3::ZERO);

        let set = build_chunk_set(&mgr, 512);
        assert_eq!(set.metas.len(), 2);
        let bases: Vec<u32> = set.metas.iter().map(|m| m.nodes_base).collect();
        assert_ne!(bases[0], bases[1]);
    }

    #[test]
    fn test_empty_chunk_uploads_with_zero_nodes() {
        let coord = ChunkCoord::new(0, 9, 0);
        let mgr = loaded_manager(&[coord], &codec::encode(&EncodedChunk::default()));
        let set = build_chunk_set(&mgr, 512);

        assert_eq!(set.metas.len(), 1);
        assert_eq!(set.metas[0].node_count, 0);
        // Known-empty chunks still land in the hash table so rays stop
        // requesting them.
        assert!(lookup(&set, coord).is_some());
    }

    #[test]
    fn test_deterministic_build() {
        let coords: Vec<ChunkCoord> = (0..20).map(|i| ChunkCoord::new(-i, i, 2 * i)).collect();
        let bytes = encoded(|x, _, _| x % 3);
        let mgr = loaded_manager(&coords, &bytes);

        let a = build_chunk_set(&mgr, 512);
        let b = build_chunk_set(&mgr, 512);
        assert_eq!(a.metas, b.metas);
        assert_eq!(a.hash_table, b.hash_table);
    }

    #[test]
    fn test_world_offset_matches_coord() {
        let coord = ChunkCoord::new(-3, 2, 7);
        let mgr = loaded_manager(&[coord], &encoded(|_, _, _| 1));
        let set = build_chunk_set(&mgr, 512);
        assert_eq!(set.metas[0].world_offset, [-96.0, 64.0, 224.0]);
    }
}
