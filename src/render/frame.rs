//! Per-frame driver for the streaming renderer.
//!
//! Owns the GPU resources and enforces the frame ordering the streaming
//! design depends on: previous-frame request readback feeds the manager,
//! dirty chunk state rebuilds the tables, and only then does the
//! ray-march dispatch see them. Fetching is returned to the caller, who
//! completes it through the manager's completion channel.

use glam::Vec3;

use super::chunk_table::{build_chunk_set, table_size_for, ChunkTableBuffers};
use super::meta_grid::{build_meta_grid, grid_base, MetaGridBuffer};
use super::request_buffer::RequestBuffer;
use super::trace::{ChunkTracePipeline, TraceParams};
use crate::streaming::ChunkStreamManager;
use crate::voxel::chunk::ChunkCoord;

/// Vertical field of view used for primary rays.
const FOV_Y_RADIANS: f32 = 1.2;

/// Everything one streaming view needs on the GPU.
pub struct StreamingRenderer {
    world: ChunkTableBuffers,
    meta_grid: MetaGridBuffer,
    requests: RequestBuffer,
    pipeline: ChunkTracePipeline,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    frame_bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
    table_size: u32,
    frame: u32,
    flags: u32,
    /// Camera chunk of the frame whose requests are still in flight to
    /// the staging buffer; readback must decode against it.
    readback_camera: ChunkCoord,
}

impl StreamingRenderer {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, soft_cap: usize) -> Self {
        let world = ChunkTableBuffers::new(device, soft_cap);
        let meta_grid = MetaGridBuffer::new(device);
        let requests = RequestBuffer::new(device);
        let pipeline = ChunkTracePipeline::new(device, &world);

        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("trace_output"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());
        let frame_bind_group =
            pipeline.create_frame_bind_group(device, &meta_grid, &requests, &output_view);

        Self {
            world,
            meta_grid,
            requests,
            pipeline,
            output,
            output_view,
            frame_bind_group,
            width,
            height,
            table_size: table_size_for(soft_cap),
            frame: 0,
            flags: 0,
            readback_camera: ChunkCoord::new(0, 0, 0),
        }
    }

    /// Debug/feature flags (see `trace::FLAG_*`).
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn output(&self) -> &wgpu::Texture {
        &self.output
    }

    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.output_view
    }

    /// Run one frame. Returns the chunk coords the manager wants fetched;
    /// the caller spawns fetches and reports through the manager's
    /// completion channel.
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        manager: &mut ChunkStreamManager,
        camera_pos: Vec3,
        camera_dir: Vec3,
    ) -> Vec<ChunkCoord> {
        self.frame += 1;

        // 1. Drain the previous frame's GPU requests into the manager.
        for coord in self.requests.process_readback(device, self.readback_camera) {
            manager.request(coord);
        }

        // 2. Drive loading and eviction.
        let plan = manager.update(camera_pos, Some(camera_dir.normalize_or_zero()));

        let camera_chunk = ChunkCoord::from_world_pos(camera_pos);

        // 3. Rebuild world tables before the dispatch that reads them.
        if manager.take_dirty() {
            let set = build_chunk_set(manager, self.table_size);
            self.world.upload(device, queue, &set);
        }
        self.meta_grid.upload(queue, &build_meta_grid(manager, camera_chunk));

        let (max_distance, max_chunk_steps) = manager.render_limits();
        self.pipeline.update_params(
            queue,
            &TraceParams::new(
                camera_pos,
                camera_dir,
                self.width,
                self.height,
                FOV_Y_RADIANS,
                manager.loaded_count() as u32,
                self.table_size,
                max_distance,
                max_chunk_steps,
                grid_base(camera_chunk),
                self.flags,
                self.frame,
            ),
        );

        // 4. Trace, then stage this frame's requests for the next one.
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("trace_frame"),
        });
        self.pipeline.dispatch(
            &mut encoder,
            &self.world,
            &self.frame_bind_group,
            self.width,
            self.height,
        );
        self.requests.schedule_readback(&mut encoder);
        queue.submit(Some(encoder.finish()));
        self.readback_camera = camera_chunk;

        plan.fetch
    }
}
