//! Client chunk manager.
//!
//! Owns the loaded-chunk map, the in-flight set, the pattern pool, and the
//! eviction policy. Fetching itself is the caller's job: `update` returns
//! the coords to fetch this frame, fetch tasks push results through the
//! completion channel, and the next `update` drains them.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use glam::Vec3;
use tokio::sync::mpsc;

use super::pool::{PoolId, SvdagPool};
use crate::voxel::chunk::{ChunkCoord, CHUNK_SIZE};
use crate::voxel::svdag::codec;

/// Streaming limits and eviction tuning.
#[derive(Clone, Debug)]
pub struct StreamingConfig {
    /// Loaded-chunk count the eviction policy steers toward.
    pub soft_cap: usize,
    /// Concurrent fetches.
    pub max_in_flight: usize,
    /// New fetches dispatched per update.
    pub max_new_per_update: usize,
    /// Chunks older than this are always evicted.
    pub ancient_age: Duration,
    /// Re-load quarantine after eviction or a decode failure.
    pub cooldown: Duration,
    /// Default ray-march range in world units.
    pub max_distance: f32,
    /// Default chunk-DDA step bound.
    pub max_chunk_steps: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            soft_cap: 3000,
            max_in_flight: 8,
            max_new_per_update: 200,
            ancient_age: Duration::from_secs(20 * 60),
            cooldown: Duration::from_secs(3),
            max_distance: 1024.0,
            max_chunk_steps: 128,
        }
    }
}

/// Eviction score weights: score = distance − in_view − 1/refcount − recency,
/// highest score evicted first.
const W_DISTANCE: f32 = 1.0;
const W_IN_VIEW: f32 = 24.0;
const W_UNIQUE: f32 = 6.0;
const W_RECENCY: f32 = 8.0;
/// Cosine of the keep cone half-angle.
const VIEW_CONE_COS: f32 = 0.5;

/// A loaded chunk: everything the GPU uploaders need.
#[derive(Debug)]
pub struct ChunkEntry {
    pub coord: ChunkCoord,
    pub pool_id: PoolId,
    loaded_at: Instant,
    last_touch: Instant,
}

/// A finished fetch, pushed by the caller's fetch tasks.
#[derive(Debug)]
pub struct Completion {
    pub coord: ChunkCoord,
    pub result: Result<Vec<u8>, String>,
}

/// What the caller does after `update`: spawn these fetches.
#[derive(Debug, Default)]
pub struct UpdatePlan {
    pub fetch: Vec<ChunkCoord>,
}

pub struct ChunkStreamManager {
    config: StreamingConfig,
    chunks: HashMap<ChunkCoord, ChunkEntry>,
    /// Queued or in-flight coords, to suppress duplicate requests.
    loading: HashSet<ChunkCoord>,
    /// Handed to fetch tasks, completion not yet drained.
    dispatched: HashSet<ChunkCoord>,
    /// Queued but not yet dispatched.
    pending: Vec<ChunkCoord>,
    /// Coord -> quarantine expiry.
    cooldowns: HashMap<ChunkCoord, Instant>,
    pool: SvdagPool,
    dirty: bool,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    /// Current adaptive render limits.
    max_distance: f32,
    max_chunk_steps: u32,
}

impl ChunkStreamManager {
    pub fn new(config: StreamingConfig) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let max_distance = config.max_distance;
        let max_chunk_steps = config.max_chunk_steps;
        Self {
            config,
            chunks: HashMap::new(),
            loading: HashSet::new(),
            dispatched: HashSet::new(),
            pending: Vec::new(),
            cooldowns: HashMap::new(),
            pool: SvdagPool::new(),
            dirty: false,
            completion_tx,
            completion_rx,
            max_distance,
            max_chunk_steps,
        }
    }

    /// Sender for fetch tasks to report through.
    pub fn completion_sender(&self) -> mpsc::UnboundedSender<Completion> {
        self.completion_tx.clone()
    }

    /// Queue a chunk for loading. No-ops for loaded, loading, or
    /// cooling-down coords.
    pub fn request(&mut self, coord: ChunkCoord) {
        if self.chunks.contains_key(&coord) || self.loading.contains(&coord) {
            return;
        }
        if let Some(&until) = self.cooldowns.get(&coord) {
            if Instant::now() < until {
                return;
            }
        }
        self.loading.insert(coord);
        self.pending.push(coord);
    }

    /// Per-frame drive: drain completions, evict, dispatch fetches.
    /// Call once per frame before rebuilding GPU state.
    pub fn update(&mut self, camera_pos: Vec3, camera_dir: Option<Vec3>) -> UpdatePlan {
        self.drain_completions(camera_pos);
        self.evict_tiers(camera_pos, camera_dir);
        self.cooldowns.retain(|_, until| Instant::now() < *until);
        self.dispatch(camera_pos)
    }

    fn drain_completions(&mut self, camera_pos: Vec3) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            match completion.result {
                Ok(bytes) => self.on_received(completion.coord, &bytes, camera_pos),
                Err(e) => {
                    let coord = completion.coord;
                    log::warn!("fetch failed for ({}, {}, {}): {}", coord.x, coord.y, coord.z, e);
                    self.loading.remove(&coord);
                    self.dispatched.remove(&coord);
                    self.quarantine(coord);
                }
            }
        }
    }

    /// Decode and intern a fetched chunk. Irrelevant completions (already
    /// evicted from `loading`, or far outside range) are dropped.
    pub fn on_received(&mut self, coord: ChunkCoord, bytes: &[u8], camera_pos: Vec3) {
        self.dispatched.remove(&coord);
        if !self.loading.remove(&coord) {
            log::trace!("stale completion for ({}, {}, {})", coord.x, coord.y, coord.z);
            return;
        }

        // Relevance check: abandoned fetches for chunks the camera left
        // behind are not interned.
        let distance = coord.world_center().distance(camera_pos);
        if distance > 2.0 * self.max_distance {
            log::trace!("dropping out-of-range chunk ({}, {}, {})", coord.x, coord.y, coord.z);
            return;
        }

        let decoded = match codec::decode(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Bad bytes: drop the chunk and quarantine the coord. The
                // ray-marcher keeps treating it as a miss, so it heals on
                // a later request.
                log::warn!("decode failed for ({}, {}, {}): {}", coord.x, coord.y, coord.z, e);
                self.quarantine(coord);
                return;
            }
        };

        let pool_id = self.pool.intern(decoded.material);
        let now = Instant::now();
        self.chunks.insert(
            coord,
            ChunkEntry { coord, pool_id, loaded_at: now, last_touch: now },
        );
        self.dirty = true;
    }

    /// Evict one chunk, releasing its pool reference.
    pub fn evict(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.chunks.remove(&coord) {
            self.pool.release(entry.pool_id);
            self.quarantine(coord);
            self.dirty = true;
        }
    }

    fn quarantine(&mut self, coord: ChunkCoord) {
        self.cooldowns.insert(coord, Instant::now() + self.config.cooldown);
    }

    fn evict_tiers(&mut self, camera_pos: Vec3, camera_dir: Option<Vec3>) {
        let now = Instant::now();

        // Tier 1: ancient chunks go unconditionally.
        let ancient: Vec<ChunkCoord> = self
            .chunks
            .values()
            .filter(|e| now.duration_since(e.loaded_at) > self.config.ancient_age)
            .map(|e| e.coord)
            .collect();
        for coord in ancient {
            self.evict(coord);
        }

        // Tier 2: score-based eviction under pressure.
        let pressure = self.chunks.len() as f32 / self.config.soft_cap as f32;
        if pressure >= 1.0 {
            let lru_weight = if pressure >= 1.2 { W_RECENCY * 4.0 } else { W_RECENCY };

            let mut scored: Vec<(f32, ChunkCoord)> = self
                .chunks
                .values()
                .map(|e| {
                    let to_chunk = e.coord.world_center() - camera_pos;
                    let distance = to_chunk.length() / CHUNK_SIZE as f32;

                    let in_view = camera_dir
                        .map(|dir| to_chunk.normalize_or_zero().dot(dir) > VIEW_CONE_COS)
                        .unwrap_or(false);

                    let age = now.duration_since(e.last_touch).as_secs_f32();
                    let recency = lru_weight / (1.0 + age);
                    let uniqueness = W_UNIQUE / self.pool.refcount(e.pool_id).max(1) as f32;

                    let score = W_DISTANCE * distance
                        - if in_view { W_IN_VIEW } else { 0.0 }
                        - uniqueness
                        - recency;
                    (score, e.coord)
                })
                .collect();

            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            let excess = self.chunks.len().saturating_sub(self.config.soft_cap);
            for (_, coord) in scored.into_iter().take(excess) {
                self.evict(coord);
            }
        }

        // Tier 3: shrink the render envelope under hard pressure.
        if pressure >= 1.5 {
            self.max_distance = self.config.max_distance * 0.5;
            self.max_chunk_steps = self.config.max_chunk_steps / 2;
            log::debug!("memory pressure {:.2}: render limits halved", pressure);
        } else if pressure < 1.0 {
            self.max_distance = self.config.max_distance;
            self.max_chunk_steps = self.config.max_chunk_steps;
        }
    }

    fn dispatch(&mut self, camera_pos: Vec3) -> UpdatePlan {
        // Drop queue entries resolved by other paths (direct receipt,
        // eviction of the queued coord's load state).
        self.pending.retain(|c| self.loading.contains(c) && !self.dispatched.contains(c));

        // Nearest first.
        self.pending.sort_by(|a, b| {
            let da = a.world_center().distance_squared(camera_pos);
            let db = b.world_center().distance_squared(camera_pos);
            da.total_cmp(&db)
        });

        let budget = self
            .config
            .max_new_per_update
            .min(self.config.max_in_flight.saturating_sub(self.dispatched.len()));

        let fetch: Vec<ChunkCoord> = self.pending.drain(..budget.min(self.pending.len())).collect();
        for &coord in &fetch {
            self.dispatched.insert(coord);
        }
        UpdatePlan { fetch }
    }

    /// True once per dirty transition; GPU buffers rebuild when it fires.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Mark a chunk as recently relevant (e.g. visible this frame).
    pub fn touch(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.chunks.get_mut(&coord) {
            entry.last_touch = Instant::now();
        }
    }

    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }

    pub fn pool(&self) -> &SvdagPool {
        &self.pool
    }

    pub fn chunks(&self) -> impl Iterator<Item = &ChunkEntry> {
        self.chunks.values()
    }

    /// Current adaptive render limits (distance, chunk steps).
    pub fn render_limits(&self) -> (f32, u32) {
        (self.max_distance, self.max_chunk_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::chunk::VoxelGrid;
    use crate::voxel::svdag::{EncodedChunk, SvdagBuilder};

    fn encoded_solid(block: u32) -> Vec<u8> {
        let dag = SvdagBuilder::new().build(&VoxelGrid::from_fn(|_, _, _| block));
        codec::encode(&EncodedChunk::material_only(dag))
    }

    fn manager() -> ChunkStreamManager {
        ChunkStreamManager::new(StreamingConfig {
            cooldown: Duration::from_millis(50),
            ..StreamingConfig::default()
        })
    }

    /// Queue and deliver a chunk without going through dispatch.
    fn load(mgr: &mut ChunkStreamManager, coord: ChunkCoord, bytes: &[u8]) {
        mgr.request(coord);
        mgr.on_received(coord, bytes, Vec3::ZERO);
        assert!(mgr.is_loaded(coord));
    }

    #[test]
    fn test_request_dedup() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(1, 0, 0);
        mgr.request(coord);
        mgr.request(coord);
        assert_eq!(mgr.loading_count(), 1);

        let plan = mgr.update(Vec3::ZERO, None);
        assert_eq!(plan.fetch, vec![coord]);

        // Still loading: further requests are swallowed.
        mgr.request(coord);
        let plan = mgr.update(Vec3::ZERO, None);
        assert!(plan.fetch.is_empty());
    }

    #[test]
    fn test_load_and_dirty_flag() {
        let mut mgr = manager();
        load(&mut mgr, ChunkCoord::new(0, 2, 0), &encoded_solid(3));

        assert!(mgr.take_dirty());
        assert!(!mgr.take_dirty());
    }

    #[test]
    fn test_loaded_chunk_not_rerequested() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(0, 0, 0);
        load(&mut mgr, coord, &encoded_solid(1));

        mgr.request(coord);
        let plan = mgr.update(Vec3::ZERO, None);
        assert!(plan.fetch.is_empty());
    }

    #[test]
    fn test_pool_dedup_and_refcounts() {
        let mut mgr = manager();
        let bytes = encoded_solid(1);
        let coords: Vec<ChunkCoord> = (0..8).map(|i| ChunkCoord::new(i, 0, 0)).collect();
        for &coord in &coords {
            load(&mut mgr, coord, &bytes);
        }

        assert_eq!(mgr.pool().len(), 1);
        let id = mgr.chunks().next().unwrap().pool_id;
        assert_eq!(mgr.pool().refcount(id), 8);

        for &coord in &coords[..4] {
            mgr.evict(coord);
        }
        assert_eq!(mgr.pool().refcount(id), 4);
        assert_eq!(mgr.pool().len(), 1);

        for &coord in &coords[4..] {
            mgr.evict(coord);
        }
        assert_eq!(mgr.pool().len(), 0);
    }

    #[test]
    fn test_bad_bytes_quarantined() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(2, 0, 0);
        mgr.request(coord);
        mgr.on_received(coord, b"not a chunk", Vec3::ZERO);

        assert!(!mgr.is_loaded(coord));
        // Cooldown suppresses an immediate retry.
        mgr.request(coord);
        assert_eq!(mgr.loading_count(), 0);

        std::thread::sleep(Duration::from_millis(60));
        mgr.update(Vec3::ZERO, None);
        mgr.request(coord);
        assert_eq!(mgr.loading_count(), 1);
    }

    #[test]
    fn test_stale_completion_dropped() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(3, 0, 0);
        // Never requested: completion is stale and ignored.
        mgr.on_received(coord, &encoded_solid(1), Vec3::ZERO);
        assert!(!mgr.is_loaded(coord));
    }

    #[test]
    fn test_in_flight_bound() {
        let mut mgr = manager();
        for i in 0..50 {
            mgr.request(ChunkCoord::new(i, 0, 0));
        }
        let plan = mgr.update(Vec3::ZERO, None);
        assert_eq!(plan.fetch.len(), mgr.config.max_in_flight);

        // No capacity until completions arrive.
        let plan = mgr.update(Vec3::ZERO, None);
        assert!(plan.fetch.is_empty());

        // Completing one frees exactly one slot.
        let coord = ChunkCoord::new(0, 0, 0);
        mgr.on_received(coord, &encoded_solid(1), Vec3::ZERO);
        let plan = mgr.update(Vec3::ZERO, None);
        assert_eq!(plan.fetch.len(), 1);
    }

    #[test]
    fn test_dispatch_nearest_first() {
        let mut mgr = manager();
        mgr.request(ChunkCoord::new(40, 0, 0));
        mgr.request(ChunkCoord::new(1, 0, 0));
        mgr.request(ChunkCoord::new(10, 0, 0));

        let plan = mgr.update(Vec3::ZERO, None);
        assert_eq!(plan.fetch[0], ChunkCoord::new(1, 0, 0));
    }

    #[test]
    fn test_completion_channel() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(0, 1, 0);
        mgr.request(coord);
        mgr.update(Vec3::ZERO, None);

        let tx = mgr.completion_sender();
        tx.send(Completion { coord, result: Ok(encoded_solid(2)) }).unwrap();

        mgr.update(Vec3::ZERO, None);
        assert!(mgr.is_loaded(coord));
    }

    #[test]
    fn test_failed_fetch_quarantines_and_frees_slot() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(4, 0, 0);
        mgr.request(coord);
        mgr.update(Vec3::ZERO, None);

        let tx = mgr.completion_sender();
        tx.send(Completion { coord, result: Err("connection reset".into()) }).unwrap();
        mgr.update(Vec3::ZERO, None);

        assert!(!mgr.is_loaded(coord));
        mgr.request(coord);
        assert_eq!(mgr.loading_count(), 0, "cooldown must swallow the retry");
    }

    #[test]
    fn test_pressure_eviction_targets_soft_cap() {
        let mut mgr = ChunkStreamManager::new(StreamingConfig {
            soft_cap: 16,
            cooldown: Duration::from_millis(1),
            ..StreamingConfig::default()
        });
        let bytes = encoded_solid(1);
        for i in 0..24 {
            load(&mut mgr, ChunkCoord::new(i, 0, 0), &bytes);
        }
        assert_eq!(mgr.loaded_count(), 24);

        mgr.update(Vec3::ZERO, None);
        assert_eq!(mgr.loaded_count(), 16);
    }

    #[test]
    fn test_eviction_prefers_far_chunks() {
        let mut mgr = ChunkStreamManager::new(StreamingConfig {
            soft_cap: 4,
            cooldown: Duration::from_millis(1),
            ..StreamingConfig::default()
        });
        let bytes = encoded_solid(1);
        for i in 0..8 {
            load(&mut mgr, ChunkCoord::new(i * 8, 0, 0), &bytes);
        }

        mgr.update(Vec3::ZERO, None);
        assert_eq!(mgr.loaded_count(), 4);
        assert!(mgr.is_loaded(ChunkCoord::new(0, 0, 0)));
        assert!(!mgr.is_loaded(ChunkCoord::new(56, 0, 0)));
    }

    #[test]
    fn test_view_cone_protects_chunks() {
        let mut mgr = ChunkStreamManager::new(StreamingConfig {
            soft_cap: 2,
            cooldown: Duration::from_millis(1),
            ..StreamingConfig::default()
        });
        let bytes = encoded_solid(1);
        // One far chunk straight ahead (+x), several off-axis but nearer.
        let ahead = ChunkCoord::new(20, 0, 0);
        load(&mut mgr, ahead, &bytes);
        for i in 0..4 {
            load(&mut mgr, ChunkCoord::new(0, 0, 8 + i), &bytes);
        }

        mgr.update(Vec3::ZERO, Some(Vec3::X));
        assert!(mgr.is_loaded(ahead), "in-view chunk must survive eviction");
    }

    #[test]
    fn test_render_limits_shrink_under_pressure() {
        let mut mgr = ChunkStreamManager::new(StreamingConfig {
            soft_cap: 4,
            cooldown: Duration::from_millis(1),
            ..StreamingConfig::default()
        });
        let (d0, s0) = mgr.render_limits();

        let bytes = encoded_solid(1);
        for i in 0..8 {
            load(&mut mgr, ChunkCoord::new(i, 0, 0), &bytes);
        }
        // 8 / 4 = 2.0 pressure at the moment eviction runs.
        mgr.update(Vec3::ZERO, None);

        let (d1, s1) = mgr.render_limits();
        assert!(d1 < d0);
        assert!(s1 < s0);
    }

    #[test]
    fn test_evicted_chunk_on_cooldown() {
        let mut mgr = manager();
        let coord = ChunkCoord::new(5, 0, 0);
        load(&mut mgr, coord, &encoded_solid(1));

        mgr.evict(coord);
        mgr.request(coord);
        assert_eq!(mgr.loading_count(), 0);
    }
}
