//! Data value representing a scalar of any numeric [ElementType](crate::models::ElementType)

use crate::error::ReconstructionError;

/// A value of any numeric element type.
/// This is an alias of the Number type from serde_json, which is an enum that can represent
/// integers and floating point numbers.
/// The number type is an enum over i64, u64 and f64, with the additional constraint that floating
/// point numbers must be finite (not positive or negative infinity or NaN).
pub type DValue = serde_json::Number;

fn incompatible<T>(value: &DValue) -> ReconstructionError {
    ReconstructionError::manifest(format!(
        "fill value {} is not representable as {}",
        value,
        std::any::type_name::<T>()
    ))
}

/// Try to convert a DValue to an i64.
fn as_i64(value: &DValue) -> Result<i64, ReconstructionError> {
    value.as_i64().ok_or_else(|| incompatible::<i64>(value))
}

/// Try to convert a DValue to a u64.
fn as_u64(value: &DValue) -> Result<u64, ReconstructionError> {
    value.as_u64().ok_or_else(|| incompatible::<u64>(value))
}

/// Try to convert a DValue to an f64.
fn as_f64(value: &DValue) -> Result<f64, ReconstructionError> {
    value.as_f64().ok_or_else(|| incompatible::<f64>(value))
}

/// Attempt to convert from a [DValue] to specific numeric type.
// This trait exists because we can't implement TryFrom<DValue> for numeric types because the trait
// and type are in external crates.
pub trait TryFromDValue: Sized {
    /// Try to convert from a [DValue] to a numeric type.
    fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError>;
}

macro_rules! impl_try_from_dvalue_signed {
    ($($t:ty),*) => {
        $(
            impl TryFromDValue for $t {
                fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError> {
                    Self::try_from(as_i64(value)?).map_err(|_| incompatible::<$t>(value))
                }
            }
        )*
    };
}

macro_rules! impl_try_from_dvalue_unsigned {
    ($($t:ty),*) => {
        $(
            impl TryFromDValue for $t {
                fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError> {
                    Self::try_from(as_u64(value)?).map_err(|_| incompatible::<$t>(value))
                }
            }
        )*
    };
}

impl_try_from_dvalue_signed!(i8, i16, i32);
impl_try_from_dvalue_unsigned!(u8, u16, u32);

impl TryFromDValue for i64 {
    fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError> {
        as_i64(value)
    }
}

impl TryFromDValue for u64 {
    fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError> {
        as_u64(value)
    }
}

impl TryFromDValue for f32 {
    fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError> {
        // If the number is too large to be represented as an f32 this cast returns infinity.
        let float = as_f64(value)? as f32;
        if float.is_finite() {
            Ok(float)
        } else {
            Err(incompatible::<f32>(value))
        }
    }
}

impl TryFromDValue for f64 {
    fn try_from_dvalue(value: &DValue) -> Result<Self, ReconstructionError> {
        as_f64(value)
    }
}
