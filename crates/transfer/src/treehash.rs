//! SHA-256 tree hash.
//!
//! Input is cut into 1 MiB sub-blocks, each sub-block is hashed, and adjacent
//! digests are hashed together pairwise, one level at a time, until a single
//! root remains. A trailing digest without a partner moves up a level
//! unchanged. Input of at most one sub-block hashes to its plain SHA-256.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::{TREE_HASH_BLOCK_SIZE, TransferError};

/// One node of the hash tree: a raw SHA-256 digest.
pub type HashNode = [u8; 32];

fn sha256(data: &[u8]) -> HashNode {
    Sha256::digest(data).into()
}

fn hash_pair(left: &HashNode, right: &HashNode) -> HashNode {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Reduces a level of digests to the tree root.
///
/// Returns `None` for an empty level.
pub fn combine(mut level: Vec<HashNode>) -> Option<HashNode> {
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            if let [left, right] = pair {
                next.push(hash_pair(left, right));
            } else {
                next.push(pair[0]);
            }
        }
        level = next;
    }
    level.pop()
}

/// Computes the tree hash of an in-memory buffer.
pub fn tree_hash(data: &[u8]) -> HashNode {
    let leaves = data.chunks(TREE_HASH_BLOCK_SIZE).map(sha256).collect();
    combine(leaves).unwrap_or_else(|| sha256(b""))
}

/// Computes the tree hash of one part and returns it hex-encoded.
pub fn hash_part(data: &[u8]) -> String {
    hex::encode(tree_hash(data))
}

/// Plain SHA-256 of `data`, hex-encoded.
pub fn linear_hash(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Tree hashes everything `reader` yields, treating the stream as one
/// sequence of sub-blocks.
pub fn hash_stream<R: Read>(mut reader: R) -> Result<String, TransferError> {
    let mut hasher = TreeHasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finish_hex())
}

/// Tree hashes a whole file.
pub fn hash_file(path: &Path) -> Result<String, TransferError> {
    let file = File::open(path)?;
    hash_stream(BufReader::with_capacity(TREE_HASH_BLOCK_SIZE, file))
}

/// Incremental tree hasher.
///
/// Sub-block boundaries depend only on the byte count seen so far, so feeding
/// the same bytes in differently sized pieces gives the same root.
#[derive(Clone, Default)]
pub struct TreeHasher {
    block: Sha256,
    block_len: usize,
    leaves: Vec<HashNode>,
    total: u64,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more input.
    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;
        while !data.is_empty() {
            let take = (TREE_HASH_BLOCK_SIZE - self.block_len).min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];

            if self.block_len == TREE_HASH_BLOCK_SIZE {
                let block = std::mem::take(&mut self.block);
                self.leaves.push(block.finalize().into());
                self.block_len = 0;
            }
        }
    }

    /// Total bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.total
    }

    /// Consumes the hasher and returns the root digest.
    pub fn finish(mut self) -> HashNode {
        if self.block_len > 0 {
            self.leaves.push(self.block.finalize().into());
        }
        combine(self.leaves).unwrap_or_else(|| sha256(b""))
    }

    /// Consumes the hasher and returns the hex-encoded root.
    pub fn finish_hex(self) -> String {
        hex::encode(self.finish())
    }
}

impl Write for TreeHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
