//! Chunk ray-march compute pipeline.
//!
//! Three bind groups: (0) trace parameters, (1) world data from the chunk
//! table uploader, (2) per-frame resources (meta-grid, request buffer,
//! output texture). Per-frame ordering is: upload dirty buffers, dispatch,
//! read back requests.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::chunk_table::ChunkTableBuffers;
use super::meta_grid::MetaGridBuffer;
use super::request_buffer::RequestBuffer;
use crate::voxel::chunk::ChunkCoord;

/// Enable the meta-grid empty-space skip. Off by default; flip on only
/// after the half-height and skip-soundness tests pass on the target
/// driver.
pub const FLAG_META_SKIP: u32 = 1;
/// Suppress request-buffer writes (debug: freeze chunk loading).
pub const FLAG_FREEZE_LOADING: u32 = 1 << 1;
/// Debug view: color by chunk-DDA step count.
pub const FLAG_DEBUG_STEPS: u32 = 1 << 2;

/// Uniform block for the kernel, 128 bytes, matching the WGSL layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TraceParams {
    pub camera_pos: [f32; 3],
    pub tan_half_fov: f32,
    pub camera_forward: [f32; 3],
    pub aspect: f32,
    pub camera_right: [f32; 3],
    pub max_distance: f32,
    pub camera_up: [f32; 3],
    pub _pad0: f32,
    pub width: u32,
    pub height: u32,
    pub chunk_count: u32,
    pub table_size: u32,
    pub max_chunk_steps: u32,
    pub flags: u32,
    pub frame: u32,
    pub _pad1: u32,
    pub camera_chunk: [i32; 3],
    pub _pad2: i32,
    pub meta_base: [i32; 3],
    pub _pad3: i32,
}

impl TraceParams {
    /// Params for a simple look-at camera.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_pos: Vec3,
        forward: Vec3,
        width: u32,
        height: u32,
        fov_y_radians: f32,
        chunk_count: u32,
        table_size: u32,
        max_distance: f32,
        max_chunk_steps: u32,
        meta_base: glam::IVec3,
        flags: u32,
        frame: u32,
    ) -> Self {
        let forward = forward.normalize();
        let right = forward.cross(Vec3::Y).normalize_or_zero();
        let right = if right == Vec3::ZERO { Vec3::X } else { right };
        let up = right.cross(forward);
        let camera_chunk = ChunkCoord::from_world_pos(camera_pos);

        Self {
            camera_pos: camera_pos.into(),
            tan_half_fov: (fov_y_radians * 0.5).tan(),
            camera_forward: forward.into(),
            aspect: width as f32 / height as f32,
            camera_right: right.into(),
            max_distance,
            camera_up: up.into(),
            _pad0: 0.0,
            width,
            height,
            chunk_count,
            table_size,
            max_chunk_steps,
            flags,
            frame,
            _pad1: 0,
            camera_chunk: [camera_chunk.x, camera_chunk.y, camera_chunk.z],
            _pad2: 0,
            meta_base: meta_base.to_array(),
            _pad3: 0,
        }
    }
}

/// The ray-march compute pipeline and its static bind groups.
pub struct ChunkTracePipeline {
    pipeline: wgpu::ComputePipeline,
    params_buffer: wgpu::Buffer,
    params_bind_group: wgpu::BindGroup,
    frame_bind_group_layout: wgpu::BindGroupLayout,
}

impl ChunkTracePipeline {
    pub fn new(device: &wgpu::Device, world: &ChunkTableBuffers) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("chunk_trace_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/chunk_trace.wgsl").into()),
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("trace_params"),
            size: std::mem::size_of::<TraceParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("trace_params_layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trace_params_bind_group"),
            layout: &params_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        let frame_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("trace_frame_layout"),
                entries: &[
                    // Meta-grid (read-only storage).
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    // Request buffer (read-write, atomics).
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    // Output color.
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("chunk_trace_pipeline_layout"),
            bind_group_layouts: &[
                &params_bind_group_layout,
                world.bind_group_layout(),
                &frame_bind_group_layout,
            ],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("chunk_trace_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            params_buffer,
            params_bind_group,
            frame_bind_group_layout,
        }
    }

    /// Bind the per-frame resources.
    pub fn create_frame_bind_group(
        &self,
        device: &wgpu::Device,
        meta_grid: &MetaGridBuffer,
        requests: &RequestBuffer,
        output: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trace_frame_bind_group"),
            layout: &self.frame_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: meta_grid.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: requests.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(output),
                },
            ],
        })
    }

    pub fn update_params(&self, queue: &wgpu::Queue, params: &TraceParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    /// Dispatch the kernel. The hash-table upload for this frame must
    /// already be recorded; the dirty-flag protocol in the manager
    /// guarantees rebuild-before-dispatch ordering.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        world: &ChunkTableBuffers,
        frame_bind_group: &wgpu::BindGroup,
        width: u32,
        height: u32,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("chunk_trace_pass"),
            timestamp_writes: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.params_bind_group, &[]);
        pass.set_bind_group(1, world.bind_group(), &[]);
        pass.set_bind_group(2, frame_bind_group, &[]);

        let workgroups_x = (width + 7) / 8;
        let workgroups_y = (height + 7) / 8;
        pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_size_and_layout() {
        // Must match the WGSL uniform block exactly.
        assert_eq!(std::mem::size_of::<TraceParams>(), 128);
        assert_eq!(std::mem::align_of::<TraceParams>(), 4);
    }

    #[test]
    fn test_params_camera_basis_is_orthonormal() {
        let p = TraceParams::new(
            Vec3::new(16.0, 135.0, 16.0),
            Vec3::new(0.3, -0.4, 0.8),
            1920,
            1080,
            1.2,
            0,
            8192,
            1024.0,
            128,
            glam::IVec3::ZERO,
            0,
            0,
        );
        let f = Vec3::from(p.camera_forward);
        let r = Vec3::from(p.camera_right);
        let u = Vec3::from(p.camera_up);
        assert!((f.length() - 1.0).abs() < 1e-5);
        assert!(f.dot(r).abs() < 1e-5);
        assert!(f.dot(u).abs() < 1e-5);
        assert!(r.dot(u).abs() < 1e-5);
    }

    #[test]
    fn test_params_camera_chunk() {
        let p = TraceParams::new(
            Vec3::new(-1.0, 33.0, 64.0),
            Vec3::X,
            640,
            480,
            1.0,
            0,
            8192,
            512.0,
            64,
            glam::IVec3::ZERO,
            0,
            0,
        );
        assert_eq!(p.camera_chunk, [-1, 1, 2]);
    }
}
