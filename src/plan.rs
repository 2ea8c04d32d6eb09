//! Partitioning of a file into transfer chunks.
//!
//! Downloads split a resource into at most `degree` near-equal byte ranges
//! (0-based indices). Uploads split a file into fixed-size parts (1-based
//! part numbers, as multipart object stores expect). Either way the
//! descriptors are contiguous, disjoint, sorted by offset, and their lengths
//! sum to the file size. An empty file still gets one zero-length
//! descriptor because the remote requires at least one part.

/// One contiguous byte range of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Part number (uploads, 1-based) or range index (downloads, 0-based).
    pub index: usize,
    /// Offset of the first byte.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

impl ChunkDescriptor {
    /// Inclusive offset of the last byte, as used in `Range` headers.
    ///
    /// Meaningless for zero-length descriptors.
    #[must_use]
    pub const fn end(&self) -> u64 {
        (self.offset + self.length).saturating_sub(1)
    }

    /// Exclusive end offset.
    #[must_use]
    pub const fn end_exclusive(&self) -> u64 {
        self.offset + self.length
    }

    /// Whether the descriptor covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Splits `size` bytes into at most `degree` ranges for parallel download.
///
/// The chunk size is `ceil(size / degree)`, so fewer ranges than requested
/// come back when the size does not fill them. A `degree` of zero is
/// treated as one.
#[must_use]
pub fn plan_ranges(size: u64, degree: usize) -> Vec<ChunkDescriptor> {
    let degree = degree.max(1) as u64;
    let chunk = size.div_ceil(degree).max(1);
    split(size, chunk, 0)
}

/// Splits `size` bytes into `part_size` parts for multipart upload.
///
/// A `part_size` of zero is treated as one.
#[must_use]
pub fn plan_parts(size: u64, part_size: u64) -> Vec<ChunkDescriptor> {
    split(size, part_size.max(1), 1)
}

fn split(size: u64, chunk: u64, first_index: usize) -> Vec<ChunkDescriptor> {
    if size == 0 {
        return vec![ChunkDescriptor {
            index: first_index,
            offset: 0,
            length: 0,
        }];
    }

    let count = size.div_ceil(chunk);
    (0..count)
        .map(|i| {
            let offset = i * chunk;
            ChunkDescriptor {
                index: first_index + usize::try_from(i).unwrap_or(usize::MAX),
                offset,
                length: chunk.min(size - offset),
            }
        })
        .collect()
}
