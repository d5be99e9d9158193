//! GPU side of the streaming renderer: buffer uploaders for the chunk
//! metadata table, spatial hash, meta-grid, and request buffer, plus the
//! ray-march compute pipeline and its CPU mirror.

pub mod context;
pub mod chunk_table;
pub mod meta_grid;
pub mod request_buffer;
pub mod trace;
pub mod cpu_trace;
pub mod frame;

pub use chunk_table::{build_chunk_set, ChunkMeta, GpuChunkSet};
pub use context::GpuContext;
pub use frame::StreamingRenderer;
pub use trace::{ChunkTracePipeline, TraceParams};
