//! CPU mirror of the ray-march kernel.
//!
//! Line-for-line equivalent of `shaders/chunk_trace.wgsl`: chunk-space
//! DDA, meta-grid skip, spatial hash lookup, request recording, and
//! stack-based world-space octree descent with front-to-back octant
//! ordering. Tests drive this implementation; the shader must agree with
//! it on every convention (voxel indexing, octant bits, hash, probe
//! order, request slots).

use glam::Vec3;

use super::chunk_table::{lookup, GpuChunkSet};
use super::meta_grid::MetaGrid;
use super::request_buffer::chunk_to_request_index;
use crate::math::{Aabb, Ray};
use crate::voxel::chunk::{ChunkCoord, CHUNK_SIZE};
use crate::voxel::material::is_transparent;
use crate::voxel::svdag::dag::{TAG_INNER, TAG_LEAF};

/// Transparent surfaces accumulated before the ray stops recording them.
pub const TRANSPARENCY_LAYER_CAP: usize = 8;

/// Static descent stack bound: depth 5 * 8 children, rounded up.
const STACK_CAP: usize = 64;

/// Trace limits, mirroring the shader uniforms.
#[derive(Clone, Copy, Debug)]
pub struct TraceConfig {
    pub max_distance: f32,
    pub max_chunk_steps: u32,
    pub meta_skip: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { max_distance: 1024.0, max_chunk_steps: 128, meta_skip: false }
    }
}

/// An opaque surface hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub distance: f32,
    pub block: u32,
    /// Axis-aligned face normal.
    pub normal: [i32; 3],
    pub chunk: ChunkCoord,
}

/// A transparent surface the ray passed through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransparentLayer {
    pub block: u32,
    pub distance: f32,
}

/// Everything one ray produced.
#[derive(Debug, Default)]
pub struct TraceOutcome {
    pub hit: Option<Hit>,
    pub layers: Vec<TransparentLayer>,
    /// Distinct missing chunks the ray requested (in view-grid range).
    pub requests: Vec<ChunkCoord>,
    pub chunk_steps: u32,
}

/// March one ray through the loaded chunk set.
pub fn trace(
    set: &GpuChunkSet,
    meta: Option<&MetaGrid>,
    ray: &Ray,
    camera_chunk: ChunkCoord,
    cfg: &TraceConfig,
) -> TraceOutcome {
    let mut outcome = TraceOutcome::default();

    let chunk_size = CHUNK_SIZE as f32;
    let mut chunk = ChunkCoord::from_world_pos(ray.origin);

    // DDA state: t to the next boundary and t per chunk, per axis.
    let step = [
        if ray.direction.x >= 0.0 { 1 } else { -1 },
        if ray.direction.y >= 0.0 { 1 } else { -1 },
        if ray.direction.z >= 0.0 { 1 } else { -1 },
    ];
    let mut t_max = [0.0f32; 3];
    let mut t_delta = [0.0f32; 3];
    for axis in 0..3 {
        let origin = ray.origin[axis];
        let cell = [chunk.x, chunk.y, chunk.z][axis] as f32;
        let boundary = (cell + if step[axis] > 0 { 1.0 } else { 0.0 }) * chunk_size;
        t_max[axis] = (boundary - origin) * ray.inv_direction[axis];
        t_delta[axis] = chunk_size * ray.inv_direction[axis].abs();
    }

    for _ in 0..cfg.max_chunk_steps {
        outcome.chunk_steps += 1;

        // Meta-grid skip: verified-empty regions step through without
        // hash lookups or requests. The cell value is re-read every
        // chunk, so the skip can never pass a non-empty cell.
        let skippable = cfg.meta_skip
            && meta.map(|m| m.value_for(chunk) == 0).unwrap_or(false);

        if !skippable {
            match lookup(set, chunk) {
                None => {
                    // Unloaded chunk: request it (if in range) and keep
                    // marching; it may be air or beyond the view grid.
                    if chunk_to_request_index(chunk, camera_chunk).is_some()
                        && !outcome.requests.contains(&chunk)
                    {
                        outcome.requests.push(chunk);
                    }
                }
                Some(idx) => {
                    if descend_chunk(set, idx as usize, ray, cfg, &mut outcome) {
                        return outcome;
                    }
                }
            }
        }

        // Advance to the next chunk along the smallest t_max.
        let axis = smallest_axis(&t_max);
        if t_max[axis] > cfg.max_distance {
            break;
        }
        match axis {
            0 => chunk.x += step[0],
            1 => chunk.y += step[1],
            _ => chunk.z += step[2],
        }
        t_max[axis] += t_delta[axis];
    }

    outcome
}

fn smallest_axis(t_max: &[f32; 3]) -> usize {
    if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
        0
    } else if t_max[1] <= t_max[2] {
        1
    } else {
        2
    }
}

/// Stack-based descent through one chunk's SVDAG. All AABBs are in world
/// space with the ray's own origin; nothing is translated into chunk-local
/// space. Returns true when an opaque hit inside range terminated the ray.
fn descend_chunk(
    set: &GpuChunkSet,
    meta_idx: usize,
    ray: &Ray,
    cfg: &TraceConfig,
    outcome: &mut TraceOutcome,
) -> bool {
    let meta = &set.metas[meta_idx];
    if meta.node_count == 0 {
        return false; // known-empty chunk
    }

    let offset = Vec3::from(meta.world_offset);
    let chunk_aabb = Aabb::new(offset, offset + Vec3::splat(meta.chunk_size));
    let Some((t_enter, _)) = ray.intersect_aabb(&chunk_aabb) else {
        return false;
    };
    let t_start = t_enter.max(0.0);

    let sign_bits = ray.sign_bits();
    let mut stack: Vec<(u32, Vec3, f32)> = Vec::with_capacity(STACK_CAP);
    stack.push((meta.root_index, offset + Vec3::splat(meta.chunk_size * 0.5), meta.chunk_size * 0.5));

    while let Some((node_off, center, half)) = stack.pop() {
        // Bad indices read as miss, never a crash.
        let Some(&tag) = set.nodes.get(node_off as usize) else {
            continue;
        };

        if tag == TAG_LEAF {
            let Some(&leaf_idx) = set.nodes.get(node_off as usize + 1) else {
                continue;
            };
            let Some(&block) = set.leaves.get((meta.leaves_base + leaf_idx) as usize) else {
                continue;
            };
            if block == 0 {
                continue;
            }

            let aabb = Aabb::cube(center, half);
            let Some((t_near, _)) = ray.intersect_aabb(&aabb) else {
                continue;
            };
            let t_hit = t_near.max(0.0).max(t_start);
            if t_hit > cfg.max_distance {
                continue;
            }

            if is_transparent(block) {
                if outcome.layers.len() < TRANSPARENCY_LAYER_CAP {
                    outcome.layers.push(TransparentLayer { block, distance: t_hit });
                }
                continue;
            }

            let axis = ray.entry_axis(&aabb);
            let mut normal = [0i32; 3];
            normal[axis as usize] = if ray.direction[axis as usize] >= 0.0 { -1 } else { 1 };

            let origin = Vec3::from(meta.world_offset);
            outcome.hit = Some(Hit {
                distance: t_hit,
                block,
                normal,
                chunk: ChunkCoord::from_world_pos(origin + Vec3::splat(0.5)),
            });
            return true;
        }

        if tag != TAG_INNER {
            continue;
        }
        let Some(&mask) = set.nodes.get(node_off as usize + 1) else {
            continue;
        };

        // Front-to-back visit order is i ^ entry_mask for ascending i,
        // where entry_mask flags the negative-direction axes. The stack
        // pops last-pushed first, so push that sequence backwards.
        let entry_mask = (sign_bits ^ 7) as u32;
        for i in (0..8u32).rev() {
            let octant = i ^ entry_mask;
            if mask & (1 << octant) == 0 {
                continue;
            }

            let child_center = child_center(center, half, octant);
            let child_aabb = Aabb::cube(child_center, half * 0.5);
            let Some((t_near, t_far)) = ray.intersect_aabb(&child_aabb) else {
                continue;
            };
            if t_far < t_start || t_near.max(0.0) > cfg.max_distance {
                continue;
            }

            let slot = (mask & ((1 << octant) - 1)).count_ones();
            let Some(&child_rel) = set.nodes.get(node_off as usize + 2 + slot as usize) else {
                continue;
            };
            if stack.len() < STACK_CAP {
                stack.push((meta.nodes_base + child_rel, child_center, half * 0.5));
            }
        }
    }

    false
}

#[inline]
fn child_center(center: Vec3, half: f32, octant: u32) -> Vec3 {
    let q = half * 0.5;
    Vec3::new(
        center.x + if octant & 1 != 0 { q } else { -q },
        center.y + if octant & 2 != 0 { q } else { -q },
        center.z + if octant & 4 != 0 { q } else { -q },
    )
}
