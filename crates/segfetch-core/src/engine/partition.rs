//! Byte-range partitioning
//!
//! Splits a file of known size into contiguous inclusive ranges, one per
//! worker. Earlier ranges get a uniform size; the remainder goes to the last
//! range so the boundaries stay deterministic.

use crate::error::CoreError;
use segfetch_types::ByteRange;

/// Partition `total_size` bytes into `segment_count` contiguous ranges.
///
/// The ranges cover `[0, total_size)` exactly with no gaps or overlaps and
/// their sizes sum to `total_size`. `segment_count = 1` degenerates to a
/// single full-file range.
pub fn partition(total_size: u64, segment_count: u32) -> Result<Vec<ByteRange>, CoreError> {
    if segment_count < 1 {
        return Err(CoreError::InvalidConfiguration(
            "segment count must be at least 1".into(),
        ));
    }
    if total_size == 0 {
        return Err(CoreError::InvalidConfiguration(
            "total file size must be non-zero".into(),
        ));
    }
    let count = segment_count as u64;
    if count > total_size {
        return Err(CoreError::InvalidConfiguration(format!(
            "cannot split {} bytes into {} segments",
            total_size, segment_count
        )));
    }

    let base_size = total_size / count;
    let mut ranges = Vec::with_capacity(segment_count as usize);
    for i in 0..count {
        let start = i * base_size;
        let end = if i == count - 1 {
            // remainder is absorbed by the last range
            total_size - 1
        } else {
            start + base_size - 1
        };
        ranges.push(ByteRange::new(start, end));
    }

    debug_assert_eq!(ranges.iter().map(|r| r.size()).sum::<u64>(), total_size);
    Ok(ranges)
}
