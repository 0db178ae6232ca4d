//! Compression and filter pipeline.

use crate::error::{DecodeError, DecodeFailureKind};
use crate::filters;
use crate::models::Filter;

use bytes::Bytes;

/// Returns data after applying a filter pipeline.
///
/// Filters are applied in the order given, which is the storage to memory direction. The decoded
/// data must be exactly `expected_size` bytes long.
///
/// # Arguments
///
/// * `filters`: Filter pipeline
/// * `element_size`: Size of an array element in bytes
/// * `expected_size`: Size in bytes of the fully decoded chunk
/// * `data`: Data to apply filter pipeline to.
pub fn filter_pipeline(
    filters: &[Filter],
    element_size: usize,
    expected_size: usize,
    data: Bytes,
) -> Result<Bytes, DecodeError> {
    let decoded = filters.iter().try_fold(data, |data, filter| {
        filters::decode(filter, element_size, expected_size, data)
    })?;
    if decoded.len() != expected_size {
        let codec = filters.last().map_or("identity", Filter::codec_name);
        return Err(DecodeError::new(
            codec,
            DecodeFailureKind::SizeMismatch,
            format!(
                "decoded {} bytes, expected {}",
                decoded.len(),
                expected_size
            ),
        ));
    }
    Ok(decoded)
}
