//! Sparse Voxel DAG: flat node storage, hash-consing builder, binary codec.

pub mod dag;
pub mod builder;
pub mod codec;

pub use dag::Svdag;
pub use builder::SvdagBuilder;
pub use codec::{CodecError, EncodedChunk};
