//! Functions and utilities for working with [ndarray] objects.

use ndarray::prelude::*;
use thiserror::Error;

/// Error viewing a reconstructed buffer as an array.
#[derive(Debug, Error)]
pub enum ArrayError {
    /// The buffer is not a whole number of correctly aligned elements
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// The buffer does not match the shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ndarray::ShapeError),
}

/// Convert from `&[u8]` to `&[T]`.
///
/// Zerocopy provides a mechanism for converting between types.
/// Correct alignment of the data is necessary.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert.
pub fn from_bytes<T: zerocopy::FromBytes>(data: &[u8]) -> Result<&[T], ArrayError> {
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(data).ok_or(
        ArrayError::FromBytes {
            type_name: std::any::type_name::<T>(),
        },
    )?;
    Ok(layout.into_slice())
}

/// Returns an [ndarray::ArrayView](ndarray::ArrayView) of a reconstructed hyperslab.
///
/// The array view borrows the data, so no copying takes place.
///
/// # Arguments
///
/// * `data`: Output of a reconstruction call, in host byte order. Must be at least as aligned as
///   an instance of `T`.
/// * `shape`: Shape of the hyperslab
pub fn build_array<'a, T>(data: &'a [u8], shape: &[usize]) -> Result<ArrayViewD<'a, T>, ArrayError>
where
    T: zerocopy::FromBytes,
{
    let data = from_bytes::<T>(data)?;
    // Views accept a longer slice than the shape needs. The buffer must hold exactly the shape.
    if Some(data.len()) != shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n)) {
        return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
    }
    Ok(ArrayView::from_shape(IxDyn(shape), data)?)
}
