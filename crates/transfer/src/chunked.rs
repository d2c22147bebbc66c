use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::{DEFAULT_PART_SIZE, TransferError, hash_part};

/// Number of parts needed for `total_size` bytes: `ceil(total_size / part_size)`.
///
/// A size that is an exact multiple of `part_size` never gets a trailing
/// zero-length part, and an empty source has no parts at all. A count that
/// does not fit in `u32` is an error.
pub fn part_count(total_size: u64, part_size: u64) -> Result<u32, TransferError> {
    if part_size == 0 {
        return Ok(0);
    }
    u32::try_from(total_size.div_ceil(part_size)).map_err(|_| TransferError::TooManyParts {
        total_size,
        part_size,
    })
}

/// One contiguous byte range of the source, ready to upload.
#[derive(Debug, Clone)]
pub struct Part {
    /// Zero-based position in byte order.
    pub index: u32,
    /// First byte offset within the source.
    pub byte_start: u64,
    /// Last byte offset within the source (inclusive).
    pub byte_end: u64,
    /// Raw part data.
    pub data: Vec<u8>,
    /// Hex tree hash of `data`.
    pub hash: String,
    /// `true` for the final part of the source.
    pub is_last: bool,
}

impl Part {
    /// Length of the part in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits a source of known length into fixed-size parts.
///
/// Reading is forward-only: a second pass over the same data needs a new
/// reader.
pub struct PartReader<R> {
    source: R,
    part_size: u64,
    total_size: u64,
    total_parts: u32,
    offset: u64,
    next_index: u32,
}

impl PartReader<File> {
    /// Opens `path` for part-wise reading.
    ///
    /// If `part_size` is 0, [`DEFAULT_PART_SIZE`] (64 MiB) is used.
    pub fn open(path: &Path, part_size: u64) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();
        Self::new(file, total_size, part_size)
    }
}

impl<R: Read> PartReader<R> {
    /// Wraps `source`, which must yield exactly `total_size` bytes.
    ///
    /// If `part_size` is 0, [`DEFAULT_PART_SIZE`] (64 MiB) is used.
    pub fn new(source: R, total_size: u64, part_size: u64) -> Result<Self, TransferError> {
        let part_size = if part_size == 0 {
            DEFAULT_PART_SIZE
        } else {
            part_size
        };
        let total_parts = part_count(total_size, part_size)?;
        Ok(Self {
            source,
            part_size,
            total_size,
            total_parts,
            offset: 0,
            next_index: 0,
        })
    }

    /// Reads and hashes the next part. Returns `None` once the source is
    /// exhausted.
    ///
    /// A source that ends before `total_size` bytes is an I/O error.
    pub fn next_part(&mut self) -> Result<Option<Part>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let len = remaining.min(self.part_size) as usize;
        let mut data = vec![0u8; len];
        self.source.read_exact(&mut data).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "source ended early: expected {} bytes at offset {}",
                        len, self.offset
                    ),
                )
            } else {
                e
            }
        })?;

        let hash = hash_part(&data);
        let byte_start = self.offset;
        let part = Part {
            index: self.next_index,
            byte_start,
            byte_end: byte_start + len as u64 - 1,
            data,
            hash,
            is_last: remaining <= self.part_size,
        };
        self.offset += len as u64;
        self.next_index += 1;
        Ok(Some(part))
    }

    /// Fixed part size in bytes.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Total source size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of parts this reader will produce in total.
    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.total_size - self.offset
    }
}

impl<R: Read> Iterator for PartReader<R> {
    type Item = Result<Part, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_part().transpose()
    }
}
