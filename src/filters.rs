//! Filter implementations.

pub mod fletcher32;
pub mod shuffle;

use crate::compression;
use crate::error::{DecodeError, DecodeFailureKind};
use crate::models::Filter;

use bytes::Bytes;

/// Decodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `element_size`: Size of an array element in bytes, used when the filter does not declare one
/// * `size_hint`: Expected size of the decoded chunk in bytes. Decompression stops with a
///   [DecodeFailureKind::SizeMismatch] error once its output exceeds this size plus room for a
///   fletcher32 checksum.
/// * `data`: Filtered data
pub fn decode(
    filter: &Filter,
    element_size: usize,
    size_hint: usize,
    data: Bytes,
) -> Result<Bytes, DecodeError> {
    let limit = size_hint.saturating_add(fletcher32::CHECKSUM_SIZE);
    match filter {
        Filter::Deflate { .. } => compression::decompress_zune_zlib(&data, limit),
        Filter::Gzip => compression::decompress_flate2_gzip(&data, limit),
        Filter::Shuffle {
            element_size: declared,
        } => Ok(shuffle::deshuffle(&data, declared.unwrap_or(element_size))),
        Filter::Fletcher32 => fletcher32::verify(data),
        unsupported => Err(DecodeError::new(
            unsupported.codec_name(),
            DecodeFailureKind::Malformed,
            "codec is not supported",
        )),
    }
}
