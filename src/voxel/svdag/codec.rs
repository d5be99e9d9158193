//! Binary chunk codec.
//!
//! Little-endian, fixed-layout, versioned. 32-byte base header:
//!
//! | off | field          | notes                                 |
//! |----:|----------------|---------------------------------------|
//! |   0 | magic          | 0x53564441 ('SVDA')                   |
//! |   4 | version        | 1 (material) or 2 (dual DAG)          |
//! |   8 | chunk_size     | always 32                             |
//! |  12 | mat_node_count | logical nodes, not words              |
//! |  16 | mat_leaf_count |                                       |
//! |  20 | mat_root_idx   | word offset; undefined when count = 0 |
//! |  24 | flags          | bit0 opaque DAG, bit1 lz4, bit2 meta  |
//! |  28 | checksum       | CRC32 of all bytes after the header; 0 disables |
//!
//! Version 2 with bit0 set appends `opq_root_idx: u32, opq_node_count: u32`
//! directly after the base header, then the opaque sections follow the
//! material sections. bit1 compresses everything after the header extension
//! with `lz4_flex` (size-prepended). The checksum covers the stored bytes,
//! compression included.
//!
//! An empty chunk is the 32-byte header alone with all counts zero.

use thiserror::Error;

use super::dag::{walk_nodes, Svdag};
use crate::voxel::chunk::CHUNK_SIZE;

/// 'SVDA' little-endian.
pub const MAGIC: u32 = 0x5356_4441;
/// Material DAG only.
pub const VERSION_MATERIAL: u32 = 1;
/// Material + optional opaque DAG.
pub const VERSION_DUAL: u32 = 2;

pub const FLAG_OPAQUE_DAG: u32 = 1;
pub const FLAG_COMPRESSED: u32 = 1 << 1;
pub const FLAG_METADATA: u32 = 1 << 2;

/// Base header length in bytes.
pub const HEADER_LEN: usize = 32;

/// Codec failure modes. `kind` strings surface verbatim in HTTP error
/// bodies and client logs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid magic: 0x{found:08X}")]
    InvalidMagic { found: u32 },

    #[error("unsupported version: {version}")]
    UnsupportedVersion { version: u32 },

    #[error("unsupported chunk size: {size}")]
    UnsupportedChunkSize { size: u32 },

    #[error("truncated payload: needed {needed}, got {got}")]
    TruncatedPayload { needed: usize, got: usize },

    #[error("node index {index} out of range (limit {limit})")]
    NodeIndexOutOfRange { index: u32, limit: u32 },

    #[error("invalid node word {word} at offset {offset}")]
    InvalidNodeTag { offset: usize, word: u32 },

    #[error("checksum mismatch: header 0x{expected:08X}, payload 0x{computed:08X}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("decompression failed: {0}")]
    Decompress(String),
}

impl CodecError {
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::InvalidMagic { .. } => "InvalidMagic",
            CodecError::UnsupportedVersion { .. } => "UnsupportedVersion",
            CodecError::UnsupportedChunkSize { .. } => "UnsupportedVersion",
            CodecError::TruncatedPayload { .. } => "TruncatedPayload",
            CodecError::NodeIndexOutOfRange { .. } => "NodeIndexOutOfRange",
            CodecError::InvalidNodeTag { .. } => "NodeIndexOutOfRange",
            CodecError::ChecksumMismatch { .. } => "ChecksumMismatch",
            CodecError::Decompress(_) => "TruncatedPayload",
        }
    }
}

/// Decoded chunk payload: the material DAG plus, for version 2 streams,
/// the optional opaque-geometry DAG. The renderer consumes only the
/// material DAG; the opaque DAG is carried for format compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedChunk {
    pub material: Svdag,
    pub opaque: Option<Svdag>,
}

impl EncodedChunk {
    pub fn material_only(material: Svdag) -> Self {
        Self { material, opaque: None }
    }

    pub fn is_empty(&self) -> bool {
        self.material.is_empty() && self.opaque.is_none()
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn get_u32(bytes: &[u8], off: usize) -> Result<u32, CodecError> {
    let slice = bytes
        .get(off..off + 4)
        .ok_or(CodecError::TruncatedPayload { needed: off + 4, got: bytes.len() })?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn words_to_bytes(out: &mut Vec<u8>, words: &[u32]) {
    for &w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u32>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError::TruncatedPayload {
            needed: bytes.len() + (4 - bytes.len() % 4),
            got: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encode with default options: uncompressed, checksummed.
pub fn encode(chunk: &EncodedChunk) -> Vec<u8> {
    encode_with(chunk, false, true)
}

/// Encode a chunk. Empty chunks always produce exactly the 32-byte header
/// with zeroed counts and flags, regardless of options.
pub fn encode_with(chunk: &EncodedChunk, compress: bool, checksum: bool) -> Vec<u8> {
    let version = if chunk.opaque.is_some() { VERSION_DUAL } else { VERSION_MATERIAL };

    if chunk.is_empty() {
        let mut out = Vec::with_capacity(HEADER_LEN);
        put_u32(&mut out, MAGIC);
        put_u32(&mut out, version);
        put_u32(&mut out, CHUNK_SIZE);
        put_u32(&mut out, 0); // mat_node_count
        put_u32(&mut out, 0); // mat_leaf_count
        put_u32(&mut out, 0); // mat_root_idx
        put_u32(&mut out, 0); // flags
        put_u32(&mut out, 0); // checksum
        return out;
    }

    let mut flags = 0u32;
    if chunk.opaque.is_some() {
        flags |= FLAG_OPAQUE_DAG;
    }

    let mut payload = Vec::with_capacity(chunk.material.byte_size());
    words_to_bytes(&mut payload, &chunk.material.nodes);
    words_to_bytes(&mut payload, &chunk.material.leaves);
    if let Some(opaque) = &chunk.opaque {
        words_to_bytes(&mut payload, &opaque.nodes);
        words_to_bytes(&mut payload, &opaque.leaves);
    }

    if compress {
        flags |= FLAG_COMPRESSED;
        payload = lz4_flex::compress_prepend_size(&payload);
    }

    // Bytes after the base header: the v2 extension, then the payload.
    let mut tail = Vec::with_capacity(payload.len() + 8);
    if let Some(opaque) = &chunk.opaque {
        put_u32(&mut tail, opaque.root);
        put_u32(&mut tail, opaque.node_count);
    }
    tail.extend_from_slice(&payload);

    let crc = if checksum {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&tail);
        hasher.finalize()
    } else {
        0
    };

    let mut out = Vec::with_capacity(HEADER_LEN + tail.len());
    put_u32(&mut out, MAGIC);
    put_u32(&mut out, version);
    put_u32(&mut out, CHUNK_SIZE);
    put_u32(&mut out, chunk.material.node_count);
    put_u32(&mut out, chunk.material.leaves.len() as u32);
    put_u32(&mut out, chunk.material.root);
    put_u32(&mut out, flags);
    put_u32(&mut out, crc);
    out.extend_from_slice(&tail);
    out
}

/// Decode and deep-validate a chunk stream.
pub fn decode(bytes: &[u8]) -> Result<EncodedChunk, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TruncatedPayload { needed: HEADER_LEN, got: bytes.len() });
    }

    let magic = get_u32(bytes, 0)?;
    if magic != MAGIC {
        return Err(CodecError::InvalidMagic { found: magic });
    }

    let version = get_u32(bytes, 4)?;
    if version != VERSION_MATERIAL && version != VERSION_DUAL {
        return Err(CodecError::UnsupportedVersion { version });
    }

    let chunk_size = get_u32(bytes, 8)?;
    if chunk_size != CHUNK_SIZE {
        return Err(CodecError::UnsupportedChunkSize { size: chunk_size });
    }

    let mat_node_count = get_u32(bytes, 12)?;
    let mat_leaf_count = get_u32(bytes, 16)? as usize;
    let mat_root = get_u32(bytes, 20)?;
    let flags = get_u32(bytes, 24)?;
    let checksum = get_u32(bytes, 28)?;

    let tail = &bytes[HEADER_LEN..];
    if checksum != 0 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(tail);
        let computed = hasher.finalize();
        if computed != checksum {
            return Err(CodecError::ChecksumMismatch { expected: checksum, computed });
        }
    }

    let has_opaque = version == VERSION_DUAL && flags & FLAG_OPAQUE_DAG != 0;

    // Empty chunk: header only. The decoder must tolerate this.
    if mat_node_count == 0 && !has_opaque {
        return Ok(EncodedChunk::default());
    }

    let (opq_root, opq_node_count, payload_bytes) = if has_opaque {
        let root = get_u32(bytes, HEADER_LEN)?;
        let count = get_u32(bytes, HEADER_LEN + 4)?;
        (root, count, &bytes[HEADER_LEN + 8..])
    } else {
        (0, 0, tail)
    };

    let payload;
    let payload_bytes: &[u8] = if flags & FLAG_COMPRESSED != 0 {
        payload = lz4_flex::decompress_size_prepended(payload_bytes)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        &payload
    } else {
        payload_bytes
    };

    let words = bytes_to_words(payload_bytes)?;

    // The node section length is implicit; walking the logical node count
    // both locates the section boundary and validates structure.
    let mat_node_words = walk_nodes(&words, mat_node_count, mat_leaf_count)?;
    let mat_end = mat_node_words + mat_leaf_count;
    if words.len() < mat_end {
        return Err(CodecError::TruncatedPayload { needed: mat_end * 4, got: words.len() * 4 });
    }

    let material = Svdag {
        nodes: words[..mat_node_words].to_vec(),
        leaves: words[mat_node_words..mat_end].to_vec(),
        root: mat_root,
        node_count: mat_node_count,
    };
    if mat_node_count > 0 && mat_root as usize >= mat_node_words {
        return Err(CodecError::NodeIndexOutOfRange {
            index: mat_root,
            limit: mat_node_words as u32,
        });
    }

    let opaque = if has_opaque {
        // The opaque leaf section has no explicit count: it runs to the end
        // of the payload. A metadata section after it would be ambiguous,
        // so bit2 is only honored on material-only streams.
        if flags & FLAG_METADATA != 0 {
            return Err(CodecError::UnsupportedVersion { version });
        }
        let rest = &words[mat_end..];
        let opq_node_words = walk_nodes(rest, opq_node_count, usize::MAX)?;
        let opq = Svdag {
            nodes: rest[..opq_node_words].to_vec(),
            leaves: rest[opq_node_words..].to_vec(),
            root: opq_root,
            node_count: opq_node_count,
        };
        opq.validate()?;
        Some(opq)
    } else {
        // Material-only stream: anything after the leaves is an ignorable
        // metadata section.
        None
    };

    Ok(EncodedChunk { material, opaque })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::chunk::VoxelGrid;
    use crate::voxel::svdag::SvdagBuilder;

    fn dag_of(f: impl FnMut(u32, u32, u32) -> u32) -> Svdag {
        SvdagBuilder::new().build(&VoxelGrid::from_fn(f))
    }

    #[test]
    fn test_empty_chunk_is_32_bytes() {
        let bytes = encode(&EncodedChunk::default());
        assert_eq!(bytes.len(), 32);
        assert_eq!(get_u32(&bytes, 0).unwrap(), MAGIC);
        assert_eq!(get_u32(&bytes, 4).unwrap(), VERSION_MATERIAL);
        assert_eq!(get_u32(&bytes, 8).unwrap(), 32);
        for off in [12, 16, 20, 24, 28] {
            assert_eq!(get_u32(&bytes, off).unwrap(), 0, "field at {off}");
        }
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_family() {
        let cases: Vec<Svdag> = vec![
            Svdag::empty(),
            dag_of(|_, _, _| 1),
            dag_of(|x, y, z| if (x + y + z) % 2 == 0 { 1 } else { 0 }),
            dag_of(|x, y, z| u32::from(x == 7 && y == 11 && z == 30) * 5),
            dag_of(|x, y, _| (x % 3) + (y % 2) * 3),
        ];

        for dag in cases {
            let chunk = EncodedChunk::material_only(dag);
            let decoded = decode(&encode(&chunk)).unwrap();
            assert_eq!(decoded, chunk);
        }
    }

    #[test]
    fn test_round_trip_compressed() {
        let chunk = EncodedChunk::material_only(dag_of(|_, y, _| u32::from(y < 12) * 3));
        let bytes = encode_with(&chunk, true, true);
        assert_eq!(get_u32(&bytes, 24).unwrap() & FLAG_COMPRESSED, FLAG_COMPRESSED);
        assert_eq!(decode(&bytes).unwrap(), chunk);
    }

    #[test]
    fn test_round_trip_dual_dag() {
        let material = dag_of(|_, y, _| if y < 16 { 4 } else { 0 });
        let opaque = dag_of(|_, y, _| u32::from(y < 8));
        let chunk = EncodedChunk { material, opaque: Some(opaque) };

        let bytes = encode(&chunk);
        assert_eq!(get_u32(&bytes, 4).unwrap(), VERSION_DUAL);
        assert_eq!(get_u32(&bytes, 24).unwrap() & FLAG_OPAQUE_DAG, FLAG_OPAQUE_DAG);
        assert_eq!(decode(&bytes).unwrap(), chunk);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = encode(&EncodedChunk::default());
        bytes[0] = 0x00;
        assert!(matches!(decode(&bytes), Err(CodecError::InvalidMagic { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = encode(&EncodedChunk::default());
        bytes[4] = 9;
        assert!(matches!(decode(&bytes), Err(CodecError::UnsupportedVersion { version: 9 })));
    }

    #[test]
    fn test_truncated_payload() {
        let chunk = EncodedChunk::material_only(dag_of(|_, _, _| 1));
        let bytes = encode_with(&chunk, false, false);
        assert!(matches!(
            decode(&bytes[..bytes.len() - 6]),
            Err(CodecError::TruncatedPayload { .. })
        ));
        assert!(matches!(decode(&bytes[..16]), Err(CodecError::TruncatedPayload { .. })));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let chunk = EncodedChunk::material_only(dag_of(|_, _, _| 1));
        let mut bytes = encode(&chunk);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(CodecError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_bad_root_index() {
        let chunk = EncodedChunk::material_only(dag_of(|_, _, _| 1));
        let mut bytes = encode_with(&chunk, false, false);
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(CodecError::NodeIndexOutOfRange { .. })));
    }

    #[test]
    fn test_trailing_metadata_ignored() {
        let chunk = EncodedChunk::material_only(dag_of(|_, _, _| 1));
        let mut bytes = encode_with(&chunk, false, false);
        bytes[24..28].copy_from_slice(&FLAG_METADATA.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        assert_eq!(decode(&bytes).unwrap(), chunk);
    }

    #[test]
    fn test_deterministic_bytes() {
        let chunk = EncodedChunk::material_only(dag_of(|x, y, z| (x ^ y ^ z) % 4));
        assert_eq!(encode(&chunk), encode(&chunk));
    }
}
