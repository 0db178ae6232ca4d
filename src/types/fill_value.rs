//! Fill values for chunks that were never written

use std::str::FromStr;

use serde::Deserialize;
use zerocopy::AsBytes;

use crate::error::ReconstructionError;
use crate::models::ElementType;
use crate::types::dvalue::TryFromDValue;
use crate::types::DValue;

/// Fill value as declared by a manifest
///
/// Chunk manifests commonly carry fill values as strings, so numeric element types accept
/// either a JSON number or a string that parses as the element type.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FillValue {
    /// A numeric value
    Number(DValue),
    /// A textual value
    Text(String),
}

impl From<i64> for FillValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for FillValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

fn numeric_bytes<T>(fill_value: &FillValue) -> Result<Vec<u8>, ReconstructionError>
where
    T: AsBytes + FromStr + TryFromDValue,
{
    let value = match fill_value {
        FillValue::Number(number) => T::try_from_dvalue(number)?,
        FillValue::Text(text) => text.trim().parse::<T>().map_err(|_| {
            ReconstructionError::manifest(format!(
                "fill value {:?} is not representable as {}",
                text,
                std::any::type_name::<T>()
            ))
        })?,
    };
    Ok(value.as_bytes().to_vec())
}

impl FillValue {
    /// Returns the bytes of a single element holding this value, in host byte order.
    pub fn element_bytes(&self, element_type: ElementType) -> Result<Vec<u8>, ReconstructionError> {
        match element_type {
            ElementType::Int8 => numeric_bytes::<i8>(self),
            ElementType::Int16 => numeric_bytes::<i16>(self),
            ElementType::Int32 => numeric_bytes::<i32>(self),
            ElementType::Int64 => numeric_bytes::<i64>(self),
            ElementType::Uint8 => numeric_bytes::<u8>(self),
            ElementType::Uint16 => numeric_bytes::<u16>(self),
            ElementType::Uint32 => numeric_bytes::<u32>(self),
            ElementType::Uint64 => numeric_bytes::<u64>(self),
            ElementType::Float32 => numeric_bytes::<f32>(self),
            ElementType::Float64 => numeric_bytes::<f64>(self),
            ElementType::FixedString(length) => match self {
                // Truncate or NUL pad to the string length.
                FillValue::Text(text) => {
                    let mut bytes = text.as_bytes().to_vec();
                    bytes.resize(length, 0);
                    Ok(bytes)
                }
                FillValue::Number(number) => Err(ReconstructionError::manifest(format!(
                    "fill value {} is not valid for a fixed_string array",
                    number
                ))),
            },
            ElementType::VariableString => Err(ReconstructionError::unsupported(
                "fill values for variable length strings",
            )),
        }
    }
}

/// Returns the bytes of a single element of an optional fill value.
///
/// Without a fill value every byte is zero.
pub fn fill_bytes(
    fill_value: Option<&FillValue>,
    element_type: ElementType,
) -> Result<Vec<u8>, ReconstructionError> {
    match fill_value {
        Some(fill_value) => fill_value.element_bytes(element_type),
        None => Ok(vec![0; element_type.size_of()]),
    }
}
