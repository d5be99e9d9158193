//! GPU request buffer: rays that traverse an unloaded chunk atomically
//! bump a counter in a slot keyed by the chunk's position in a 33^3 view
//! grid centered on the camera. After each frame the buffer is copied to
//! a staging buffer, read on the CPU, converted back to chunk coords, and
//! cleared.

use crate::voxel::chunk::ChunkCoord;

/// View grid edge in chunks (camera-centered, +/-16).
pub const REQUEST_GRID_EDGE: i32 = 33;

/// Total slots (33^3).
pub const REQUEST_SLOT_COUNT: usize =
    (REQUEST_GRID_EDGE * REQUEST_GRID_EDGE * REQUEST_GRID_EDGE) as usize;

/// Shader-side marker for "outside the view grid, write nothing".
pub const REQUEST_INDEX_NONE: u32 = 0xFFFF_FFFF;

/// Slot for a chunk coord, or None outside the centered view grid.
/// The shader computes the identical mapping.
pub fn chunk_to_request_index(coord: ChunkCoord, camera_chunk: ChunkCoord) -> Option<u32> {
    let half = REQUEST_GRID_EDGE / 2;
    let dx = coord.x - camera_chunk.x + half;
    let dy = coord.y - camera_chunk.y + half;
    let dz = coord.z - camera_chunk.z + half;

    if dx < 0 || dy < 0 || dz < 0
        || dx >= REQUEST_GRID_EDGE || dy >= REQUEST_GRID_EDGE || dz >= REQUEST_GRID_EDGE
    {
        return None;
    }
    Some(((dz * REQUEST_GRID_EDGE + dy) * REQUEST_GRID_EDGE + dx) as u32)
}

/// Inverse of `chunk_to_request_index` over in-grid slots.
pub fn index_to_chunk(slot: u32, camera_chunk: ChunkCoord) -> ChunkCoord {
    debug_assert!((slot as usize) < REQUEST_SLOT_COUNT);
    let half = REQUEST_GRID_EDGE / 2;
    let slot = slot as i32;
    let dx = slot % REQUEST_GRID_EDGE;
    let dy = (slot / REQUEST_GRID_EDGE) % REQUEST_GRID_EDGE;
    let dz = slot / (REQUEST_GRID_EDGE * REQUEST_GRID_EDGE);

    ChunkCoord::new(
        camera_chunk.x + dx - half,
        camera_chunk.y + dy - half,
        camera_chunk.z + dz - half,
    )
}

/// The GPU buffers and readback plumbing.
pub struct RequestBuffer {
    request_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    readback_pending: bool,
}

const BUFFER_BYTES: u64 = (REQUEST_SLOT_COUNT * std::mem::size_of::<u32>()) as u64;

impl RequestBuffer {
    pub fn new(device: &wgpu::Device) -> Self {
        let request_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("chunk_request_buffer"),
            size: BUFFER_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("chunk_request_staging"),
            size: BUFFER_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self { request_buffer, staging_buffer, readback_pending: false }
    }

    /// The GPU-side slot array; the trace pipeline binds it read-write.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.request_buffer
    }

    /// Copy the request buffer to staging, then clear it for the next
    /// frame. Record after the trace pass.
    pub fn schedule_readback(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_buffer_to_buffer(&self.request_buffer, 0, &self.staging_buffer, 0, BUFFER_BYTES);
        encoder.clear_buffer(&self.request_buffer, 0, None);
        self.readback_pending = true;
    }

    /// Map the staging buffer and convert non-zero slots to chunk coords.
    /// `camera_chunk` must be the value the traced frame used.
    pub fn process_readback(
        &mut self,
        device: &wgpu::Device,
        camera_chunk: ChunkCoord,
    ) -> Vec<ChunkCoord> {
        if !self.readback_pending {
            return Vec::new();
        }
        self.readback_pending = false;

        let slice = self.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::PollType::Wait { submission_index: None, timeout: None });

        let mut coords = Vec::new();
        match rx.recv() {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range();
                let slots: &[u32] = bytemuck::cast_slice(&data[..]);
                for (slot, &count) in slots.iter().enumerate() {
                    if count > 0 {
                        coords.push(index_to_chunk(slot as u32, camera_chunk));
                    }
                }
                drop(data);
                self.staging_buffer.unmap();
            }
            _ => {
                log::warn!("request buffer readback failed; dropping frame's requests");
            }
        }

        if !coords.is_empty() {
            log::trace!("request buffer: {} distinct chunks", coords.len());
        }
        coords
    }
}
