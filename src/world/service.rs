//! The chunk endpoint service.
//!
//! `get_chunk` implements the full pipeline: chunk cache -> super-chunk
//! cache or generation -> voxelize -> SVDAG build -> encode -> cache ->
//! bytes. Super-chunk generation is expensive, so concurrent requests for
//! the same (world, sx, sz) are collapsed into a single flight.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::cache::{ChunkStore, SuperChunkStore};
use crate::core::{Error, Result};
use crate::generation::super_chunk::SuperChunkRecord;
use crate::generation::{voxelize_chunk, GeneratorConfig, SuperChunkGenerator};
use crate::voxel::chunk::{ChunkCoord, SuperChunkCoord, CHUNK_SIZE};
use crate::voxel::material::{Material, MATERIALS};
use crate::voxel::svdag::{codec, EncodedChunk, SvdagBuilder};

/// Recently used super-chunk records kept in memory. Records are ~2 MB,
/// so a handful covers the working set of a streaming client.
const RECORD_CACHE_CAP: usize = 8;

/// Coordinates beyond this are rejected before touching the generator;
/// chunk * 32 must stay well inside f32-exact integer range for the
/// client's world-space math.
pub const MAX_CHUNK_COORD: i32 = 1 << 24;

/// Definition of one world served by the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub generator: GeneratorConfig,
    #[serde(default = "default_spawn")]
    pub spawn: [f32; 3],
}

fn default_spawn() -> [f32; 3] {
    [16.0, 135.0, 16.0]
}

/// World manifest served to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub seed: u32,
    pub chunk_size: u32,
    pub materials: &'static [Material],
    pub spawn: [f32; 3],
}

struct WorldEntry {
    config: WorldConfig,
    generator: Arc<SuperChunkGenerator>,
}

/// Serves chunk bytes for a set of registered worlds.
pub struct WorldService {
    worlds: HashMap<String, WorldEntry>,
    super_store: SuperChunkStore,
    chunk_store: ChunkStore,
    /// In-memory LRU of super-chunk records: (world, sx, sz) -> record,
    /// oldest first in the access list.
    records: Mutex<RecordCache>,
    /// Single-flight locks per (world, sx, sz).
    generation_locks: Mutex<HashMap<(String, i32, i32), Arc<tokio::sync::Mutex<()>>>>,
}

impl WorldService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            worlds: HashMap::new(),
            super_store: SuperChunkStore::new(&data_dir),
            chunk_store: ChunkStore::new(&data_dir),
            records: Mutex::new(RecordCache::new(RECORD_CACHE_CAP)),
            generation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a world. Call before sharing the service.
    pub fn register_world(&mut self, id: impl Into<String>, config: WorldConfig) {
        let id = id.into();
        let generator = Arc::new(SuperChunkGenerator::new(config.generator.clone()));
        log::info!("world '{}' registered (seed {})", id, config.generator.seed);
        self.worlds.insert(id, WorldEntry { config, generator });
    }

    pub fn world_ids(&self) -> impl Iterator<Item = &str> {
        self.worlds.keys().map(String::as_str)
    }

    fn entry(&self, world: &str) -> Result<&WorldEntry> {
        self.worlds
            .get(world)
            .ok_or_else(|| Error::UnknownWorld(world.to_string()))
    }

    fn check_coord(coord: ChunkCoord) -> Result<()> {
        if coord.x.abs() > MAX_CHUNK_COORD
            || coord.y.abs() > MAX_CHUNK_COORD
            || coord.z.abs() > MAX_CHUNK_COORD
        {
            return Err(Error::InvalidCoordinate(format!(
                "({}, {}, {}) outside addressable range",
                coord.x, coord.y, coord.z
            )));
        }
        Ok(())
    }

    /// The world manifest.
    pub fn manifest(&self, world: &str) -> Result<Manifest> {
        let entry = self.entry(world)?;
        Ok(Manifest {
            seed: entry.config.generator.seed,
            chunk_size: CHUNK_SIZE,
            materials: MATERIALS,
            spawn: entry.config.spawn,
        })
    }

    /// Encoded chunk bytes, generated on first demand and cached.
    pub async fn get_chunk(&self, world: &str, coord: ChunkCoord) -> Result<Vec<u8>> {
        let entry = self.entry(world)?;
        Self::check_coord(coord)?;

        if let Some(bytes) = self.chunk_store.load(world, coord).await? {
            return Ok(bytes);
        }

        let record = self.get_super_chunk(world, coord.super_chunk()).await?;

        let generator = entry.generator.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            let grid = voxelize_chunk(&record, generator.config(), coord);
            let dag = SvdagBuilder::new().build(&grid);
            codec::encode(&EncodedChunk::material_only(dag))
        })
        .await
        .map_err(|e| Error::Generation(e.to_string()))?;

        self.chunk_store.store(world, coord, &bytes).await?;
        Ok(bytes)
    }

    /// Super-chunk record for a region, from memory, disk, or generation.
    /// Generation for one key runs at most once at a time.
    pub async fn get_super_chunk(
        &self,
        world: &str,
        coord: SuperChunkCoord,
    ) -> Result<Arc<SuperChunkRecord>> {
        let entry = self.entry(world)?;

        if let Some(record) = self.records.lock().unwrap().get(world, coord) {
            return Ok(record);
        }

        let lock = self.flight_lock(world, coord);
        let _guard = lock.lock().await;

        // Re-check both tiers: another flight may have finished while we
        // waited on the lock.
        if let Some(record) = self.records.lock().unwrap().get(world, coord) {
            return Ok(record);
        }
        if let Some(record) = self.super_store.load(world, coord).await? {
            let record = Arc::new(record);
            self.records.lock().unwrap().insert(world, coord, record.clone());
            return Ok(record);
        }

        let generator = entry.generator.clone();
        let record = tokio::task::spawn_blocking(move || generator.generate(coord))
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        self.super_store.store(world, &record).await?;
        let record = Arc::new(record);
        self.records.lock().unwrap().insert(world, coord, record.clone());

        self.release_flight_lock(world, coord);
        Ok(record)
    }

    /// Drop one chunk from the disk cache.
    pub async fn invalidate_chunk(&self, world: &str, coord: ChunkCoord) -> Result<()> {
        self.entry(world)?;
        self.chunk_store.invalidate(world, coord).await?;
        Ok(())
    }

    /// Drop a super-chunk record from both cache tiers. Chunks voxelized
    /// from it stay cached until individually invalidated.
    pub async fn invalidate_super_chunk(&self, world: &str, coord: SuperChunkCoord) -> Result<()> {
        self.entry(world)?;
        self.records.lock().unwrap().remove(world, coord);
        self.super_store.invalidate(world, coord).await?;
        Ok(())
    }

    fn flight_lock(&self, world: &str, coord: SuperChunkCoord) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.generation_locks.lock().unwrap();
        locks
            .entry((world.to_string(), coord.x, coord.z))
            .or_default()
            .clone()
    }

    fn release_flight_lock(&self, world: &str, coord: SuperChunkCoord) {
        self.generation_locks
            .lock()
            .unwrap()
            .remove(&(world.to_string(), coord.x, coord.z));
    }
}

/// Small LRU over super-chunk records, access order oldest-first.
struct RecordCache {
    cap: usize,
    entries: HashMap<(String, i32, i32), Arc<SuperChunkRecord>>,
    access: Vec<(String, i32, i32)>,
}

impl RecordCache {
    fn new(cap: usize) -> Self {
        Self { cap, entries: HashMap::new(), access: Vec::new() }
    }

    fn get(&mut self, world: &str, coord: SuperChunkCoord) -> Option<Arc<SuperChunkRecord>> {
        let key = (world.to_string(), coord.x, coord.z);
        let record = self.entries.get(&key)?.clone();
        self.touch(&key);
        Some(record)
    }

    fn insert(&mut self, world: &str, coord: SuperChunkCoord, record: Arc<SuperChunkRecord>) {
        let key = (world.to_string(), coord.x, coord.z);
        if self.entries.insert(key.clone(), record).is_none() && self.entries.len() > self.cap {
            let oldest = self.access.remove(0);
            self.entries.remove(&oldest);
        }
        self.touch(&key);
    }

    fn remove(&mut self, world: &str, coord: SuperChunkCoord) {
        let key = (world.to_string(), coord.x, coord.z);
        self.entries.remove(&key);
        self.access.retain(|k| k != &key);
    }

    fn touch(&mut self, key: &(String, i32, i32)) {
        self.access.retain(|k| k != key);
        self.access.push(key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::material::block;

    fn fast_world() -> WorldConfig {
        WorldConfig {
            generator: GeneratorConfig {
                erosion_passes: 1,
                particles_per_pass: 1_000,
                ..GeneratorConfig::default()
            },
            spawn: default_spawn(),
        }
    }

    fn service(dir: &std::path::Path) -> WorldService {
        let mut service = WorldService::new(dir);
        service.register_world("alpha", fast_world());
        service
    }

    #[tokio::test]
    async fn test_unknown_world() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let err = service.get_chunk("nope", ChunkCoord::new(0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownWorld(_)));
    }

    #[tokio::test]
    async fn test_invalid_coordinate() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let err = service
            .get_chunk("alpha", ChunkCoord::new(i32::MAX, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCoordinate(_)));
    }

    #[tokio::test]
    async fn test_get_chunk_decodes_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let coord = ChunkCoord::new(0, 0, 0);

        let bytes = service.get_chunk("alpha", coord).await.unwrap();
        let decoded = codec::decode(&bytes).unwrap();
        // Ground-level chunk of a default world has terrain in it.
        assert!(!decoded.material.is_empty());
        assert!(decoded
            .material
            .leaves
            .iter()
            .all(|&b| b != block::AIR));

        // Second call must come back byte-identical (from the cache).
        let again = service.get_chunk("alpha", coord).await.unwrap();
        assert_eq!(bytes, again);
    }

    #[tokio::test]
    async fn test_determinism_across_services() {
        let coord = ChunkCoord::new(3, 1, -2);

        let dir_a = tempfile::tempdir().unwrap();
        let a = service(dir_a.path()).get_chunk("alpha", coord).await.unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        let b = service(dir_b.path()).get_chunk("alpha", coord).await.unwrap();

        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_sky_chunk_is_empty_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        // Far above max_height: nothing but air.
        let bytes = service.get_chunk("alpha", ChunkCoord::new(0, 50, 0)).await.unwrap();
        assert_eq!(bytes.len(), 32);
        assert!(codec::decode(&bytes).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_generation() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));

        // Chunks in the same super-chunk, requested concurrently.
        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service.get_chunk("alpha", ChunkCoord::new(i, 0, 0)).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_invalidate_chunk_regenerates_identically() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let coord = ChunkCoord::new(1, 0, 1);

        let before = service.get_chunk("alpha", coord).await.unwrap();
        service.invalidate_chunk("alpha", coord).await.unwrap();
        let after = service.get_chunk("alpha", coord).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let manifest = service.manifest("alpha").unwrap();
        assert_eq!(manifest.chunk_size, 32);

        let json = serde_json::to_value(&manifest).unwrap();
        assert!(json.get("chunkSize").is_some());
        assert!(json.get("materials").unwrap().as_array().unwrap().len() > 1);
    }
}
