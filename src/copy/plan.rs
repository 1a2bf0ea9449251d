//! Byte-range partitioning for multipart copies.

use crate::error::{Result, StorageError};

/// One inclusive byte range of the source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number, as the completion protocol requires.
    pub index: u32,
    /// First byte, inclusive.
    pub start: u64,
    /// Last byte, inclusive.
    pub end: u64,
}

impl PartRange {
    /// Bytes covered by the range; at least 1.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// HTTP range value, e.g. `bytes=0-1023`.
    pub fn http_range(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Ordered, immutable partition of `[0, total_length)` into parts of at most
/// `part_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    total_length: u64,
    part_size: u64,
    parts: Vec<PartRange>,
}

impl CopyPlan {
    /// Plans `ceil(total_length / max_part_bytes)` contiguous parts.
    ///
    /// A zero-length object yields an empty plan; callers copy those
    /// directly. Fails with [`StorageError::PlanTooLarge`] when the part
    /// count exceeds `max_parts`.
    pub fn new(total_length: u64, max_part_bytes: u64, max_parts: u64) -> Result<Self> {
        if max_part_bytes == 0 {
            return Err(StorageError::InvalidArgument {
                reason: "part size must be greater than zero".into(),
            });
        }

        let max_parts = max_parts.min(u64::from(u32::MAX));
        let part_count = total_length.div_ceil(max_part_bytes);
        if part_count > max_parts {
            return Err(StorageError::PlanTooLarge {
                length: total_length,
                parts: part_count,
                max_parts,
            });
        }

        let parts = (0..part_count)
            .map(|i| PartRange {
                index: (i + 1) as u32,
                start: i * max_part_bytes,
                end: (i + 1).saturating_mul(max_part_bytes).min(total_length) - 1,
            })
            .collect();

        Ok(Self {
            total_length,
            part_size: max_part_bytes,
            parts,
        })
    }

    /// Ranges in ascending index order.
    pub fn parts(&self) -> &[PartRange] {
        &self.parts
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// True only for a zero-length object.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Length of the source object.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Size of every part but the last.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }
}

impl<'a> IntoIterator for &'a CopyPlan {
    type Item = &'a PartRange;
    type IntoIter = std::slice::Iter<'a, PartRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}
