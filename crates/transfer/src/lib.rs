//! Part chunking and tree hashing for multipart archive uploads.
//!
//! A file is split into fixed-size [`Part`]s by a [`PartReader`]; every part
//! carries its own SHA-256 tree hash so the service can check it on arrival.
//! The whole-file tree hash is computed separately by [`hash_file`] over
//! 1 MiB sub-blocks that ignore part boundaries.

mod chunked;
mod progress;
mod treehash;
mod validation;

pub use chunked::{Part, PartReader, part_count};
pub use progress::{PartProgress, ProgressSnapshot, format_bytes};
pub use treehash::{
    HashNode, TreeHasher, combine, hash_file, hash_part, hash_stream, linear_hash, tree_hash,
};
pub use validation::validate_part_size;

const MIB: u64 = 1024 * 1024;

/// Sub-block size used by the tree hash: 1 MiB.
pub const TREE_HASH_BLOCK_SIZE: usize = 1024 * 1024;

/// Default part size: 64 MiB.
pub const DEFAULT_PART_SIZE: u64 = 64 * MIB;

/// Smallest part size the service accepts (1 MiB).
pub const MIN_PART_SIZE: u64 = MIB;

/// Largest part size the service accepts (4 GiB).
pub const MAX_PART_SIZE: u64 = 4096 * MIB;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid part size {0}: must be a power of two between 1 MiB and 4 GiB")]
    InvalidPartSize(u64),

    #[error("{total_size} bytes in parts of {part_size} bytes needs more than 4294967295 parts")]
    TooManyParts { total_size: u64, part_size: u64 },
}
