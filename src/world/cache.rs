//! Disk caches for super-chunk records and encoded chunks.
//!
//! Layout under the data root:
//!   worlds/{id}/superchunks/{sx}_{sz}/{heightmap,biome,river,block}.bin
//!   worlds/{id}/superchunks/{sx}_{sz}/meta.json
//!   worlds/{id}/chunks/{cx}_{cy}_{cz}.svdag
//!
//! Writes go to a `.tmp` sibling and rename into place, so concurrent
//! readers never observe a torn file. Corrupt or mismatched cache entries
//! are treated as misses and regenerated.

use std::io;
use std::path::{Path, PathBuf};

use crate::generation::heightmap::HeightField;
use crate::generation::super_chunk::{SuperChunkMeta, SuperChunkRecord, MAP_RES};
use crate::voxel::chunk::{ChunkCoord, SuperChunkCoord};

/// Write bytes atomically: temp sibling plus rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn bytes_to_f32s(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn u16s_to_bytes(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn bytes_to_u16s(bytes: &[u8]) -> Option<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
    )
}

/// Disk cache for super-chunk records.
#[derive(Clone)]
pub struct SuperChunkStore {
    root: PathBuf,
}

impl SuperChunkStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into() }
    }

    fn dir(&self, world: &str, coord: SuperChunkCoord) -> PathBuf {
        self.root
            .join("worlds")
            .join(world)
            .join("superchunks")
            .join(format!("{}_{}", coord.x, coord.z))
    }

    /// Load a cached record, or None on miss or corruption.
    pub async fn load(
        &self,
        world: &str,
        coord: SuperChunkCoord,
    ) -> io::Result<Option<SuperChunkRecord>> {
        let dir = self.dir(world, coord);

        let Some(meta_bytes) = read_optional(&dir.join("meta.json")).await? else {
            return Ok(None);
        };
        let Ok(meta) = serde_json::from_slice::<SuperChunkMeta>(&meta_bytes) else {
            log::warn!("superchunk ({}, {}): unreadable meta, regenerating", coord.x, coord.z);
            return Ok(None);
        };

        let (Some(height), Some(biome), Some(river), Some(surface)) = (
            read_optional(&dir.join("heightmap.bin")).await?,
            read_optional(&dir.join("biome.bin")).await?,
            read_optional(&dir.join("river.bin")).await?,
            read_optional(&dir.join("block.bin")).await?,
        ) else {
            return Ok(None);
        };

        let cells = MAP_RES * MAP_RES;
        let height = bytes_to_f32s(&height).filter(|v| v.len() == cells);
        let surface = bytes_to_u16s(&surface).filter(|v| v.len() == cells);
        let (Some(height), Some(surface)) = (height, surface) else {
            log::warn!("superchunk ({}, {}): map size mismatch, regenerating", coord.x, coord.z);
            return Ok(None);
        };
        if biome.len() != cells || river.len() != cells {
            log::warn!("superchunk ({}, {}): map size mismatch, regenerating", coord.x, coord.z);
            return Ok(None);
        }

        log::debug!("superchunk cache hit ({}, {})", coord.x, coord.z);
        Ok(Some(SuperChunkRecord {
            coord,
            height: HeightField::from_data(MAP_RES, height),
            biome,
            river,
            surface,
            meta,
        }))
    }

    /// Persist a record. Each map is written atomically; meta.json last so
    /// a record with meta present always has all maps present.
    pub async fn store(&self, world: &str, record: &SuperChunkRecord) -> io::Result<()> {
        let dir = self.dir(world, record.coord);

        write_atomic(&dir.join("heightmap.bin"), &f32s_to_bytes(record.height.data())).await?;
        write_atomic(&dir.join("biome.bin"), &record.biome).await?;
        write_atomic(&dir.join("river.bin"), &record.river).await?;
        write_atomic(&dir.join("block.bin"), &u16s_to_bytes(&record.surface)).await?;

        let meta = serde_json::to_vec_pretty(&record.meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(&dir.join("meta.json"), &meta).await?;

        log::debug!("superchunk stored ({}, {})", record.coord.x, record.coord.z);
        Ok(())
    }

    /// Drop a cached record so the next request regenerates it.
    pub async fn invalidate(&self, world: &str, coord: SuperChunkCoord) -> io::Result<()> {
        let dir = self.dir(world, coord);
        for name in ["meta.json", "heightmap.bin", "biome.bin", "river.bin", "block.bin"] {
            remove_if_exists(&dir.join(name)).await?;
        }
        Ok(())
    }
}

/// Disk cache for encoded chunk binaries.
#[derive(Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into() }
    }

    fn path(&self, world: &str, coord: ChunkCoord) -> PathBuf {
        self.root
            .join("worlds")
            .join(world)
            .join("chunks")
            .join(format!("{}_{}_{}.svdag", coord.x, coord.y, coord.z))
    }

    pub async fn load(&self, world: &str, coord: ChunkCoord) -> io::Result<Option<Vec<u8>>> {
        let bytes = read_optional(&self.path(world, coord)).await?;
        if bytes.is_some() {
            log::debug!("chunk cache hit ({}, {}, {})", coord.x, coord.y, coord.z);
        }
        Ok(bytes)
    }

    pub async fn store(&self, world: &str, coord: ChunkCoord, bytes: &[u8]) -> io::Result<()> {
        write_atomic(&self.path(world, coord), bytes).await
    }

    pub async fn invalidate(&self, world: &str, coord: ChunkCoord) -> io::Result<()> {
        remove_if_exists(&self.path(world, coord)).await
    }
}
