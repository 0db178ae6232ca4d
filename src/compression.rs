//! Decompression support.

use crate::error::{DecodeError, DecodeFailureKind};

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use zune_inflate::errors::DecodeErrorStatus;
use zune_inflate::{DeflateDecoder, DeflateOptions};

fn limit_exceeded(codec: &'static str, limit: usize) -> DecodeError {
    DecodeError::new(
        codec,
        DecodeFailureKind::SizeMismatch,
        format!("decompressed data exceeds {} bytes", limit),
    )
}

/// Decompress a gzip member.
///
/// # Arguments
///
/// * `data`: Compressed data
/// * `limit`: Maximum size of the decompressed data in bytes
pub fn decompress_flate2_gzip(data: &[u8], limit: usize) -> Result<Bytes, DecodeError> {
    // Read at most one byte past the limit, enough to tell that the limit was exceeded.
    let mut decoder = GzDecoder::<&[u8]>::new(data).take((limit as u64).saturating_add(1));
    // Allocate the whole buffer up front so that it is not reallocated, keeping the 8-byte
    // alignment of the first allocation.
    let mut buf = maligned::align_first::<u8, maligned::A8>(limit.saturating_add(1));
    decoder
        .read_to_end(&mut buf)
        .map_err(|err| DecodeError::malformed("gzip", err))?;
    if buf.len() > limit {
        return Err(limit_exceeded("gzip", limit));
    }
    Ok(buf.into())
}

/// Decompress a zlib stream, as written by the HDF5 deflate filter.
///
/// # Arguments
///
/// * `data`: Compressed data
/// * `limit`: Maximum size of the decompressed data in bytes
pub fn decompress_zune_zlib(data: &[u8], limit: usize) -> Result<Bytes, DecodeError> {
    let options = DeflateOptions::default()
        .set_limit(limit)
        .set_size_hint(limit);
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    let data = decoder.decode_zlib().map_err(|err| match err.error {
        DecodeErrorStatus::OutputLimitExceeded(..) => limit_exceeded("deflate", limit),
        _ => DecodeError::malformed("deflate", err),
    })?;
    Ok(data.into())
}
