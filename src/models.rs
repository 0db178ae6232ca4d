//! Data types and associated functions and methods

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::ReconstructionError;

/// Position of a chunk in the chunk grid, one zero-based index per dimension.
pub type ChunkCoord = Vec<usize>;

/// Element data types as declared by a manifest
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DType {
    /// [i8]
    Int8,
    /// [i16]
    Int16,
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u8]
    Uint8,
    /// [u16]
    Uint16,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
    /// Fixed length, NUL padded byte string
    FixedString,
    /// Variable length string stored as heap references
    VariableString,
}

/// Element type of an array
///
/// A closed set of element layouts. Copy and conversion routines are parameterised by
/// [ElementType::size_of] and [ElementType::is_byte_order_sensitive] rather than by per-type
/// code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    /// Fixed length string of the given number of bytes
    FixedString(usize),
    /// Variable length string. Never decodable; rejected by layout validation.
    VariableString,
}

impl ElementType {
    /// Build an element type from a declared data type.
    ///
    /// `string_length` is required for, and only permitted with, [DType::FixedString].
    pub fn from_dtype(
        dtype: DType,
        string_length: Option<usize>,
    ) -> Result<Self, ReconstructionError> {
        let element_type = match (dtype, string_length) {
            (DType::FixedString, Some(0)) => {
                return Err(ReconstructionError::manifest(
                    "fixed_string length must be greater than 0",
                ))
            }
            (DType::FixedString, Some(length)) => Self::FixedString(length),
            (DType::FixedString, None) => {
                return Err(ReconstructionError::manifest(
                    "fixed_string requires a string_length",
                ))
            }
            (_, Some(_)) => {
                return Err(ReconstructionError::manifest(format!(
                    "string_length is not valid for dtype {}",
                    dtype
                )))
            }
            (DType::Int8, None) => Self::Int8,
            (DType::Int16, None) => Self::Int16,
            (DType::Int32, None) => Self::Int32,
            (DType::Int64, None) => Self::Int64,
            (DType::Uint8, None) => Self::Uint8,
            (DType::Uint16, None) => Self::Uint16,
            (DType::Uint32, None) => Self::Uint32,
            (DType::Uint64, None) => Self::Uint64,
            (DType::Float32, None) => Self::Float32,
            (DType::Float64, None) => Self::Float64,
            (DType::VariableString, None) => Self::VariableString,
        };
        Ok(element_type)
    }

    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int8 => std::mem::size_of::<i8>(),
            Self::Int16 => std::mem::size_of::<i16>(),
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint8 => std::mem::size_of::<u8>(),
            Self::Uint16 => std::mem::size_of::<u16>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
            Self::FixedString(length) => length,
            // Length word plus global heap ID.
            Self::VariableString => 16,
        }
    }

    /// Whether elements of this type must be byte swapped when the stored byte order differs
    /// from the host byte order.
    pub fn is_byte_order_sensitive(self) -> bool {
        !matches!(
            self,
            Self::Int8 | Self::Uint8 | Self::FixedString(_) | Self::VariableString
        )
    }
}

/// A stage of a chunk's filter pipeline
///
/// Stages are listed in the order in which they are applied when reading, i.e. storage to
/// memory.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "id")]
pub enum Filter {
    /// zlib stream (HDF5 filter 1)
    #[serde(alias = "zlib")]
    Deflate {
        /// Compression level used when writing. Not needed to decode.
        #[serde(default)]
        level: Option<u32>,
    },
    /// gzip member
    Gzip,
    /// Byte shuffle (HDF5 filter 2)
    Shuffle {
        /// Element size in bytes. Defaults to the element type's size.
        #[serde(default)]
        element_size: Option<usize>,
    },
    /// Trailing Fletcher-32 checksum (HDF5 filter 3)
    Fletcher32,
    Szip,
    Nbit,
    Scaleoffset,
    Bzip2,
    Zstd,
    Blosc,
    Lz4,
}

impl Filter {
    /// Name of the codec, used in diagnostics.
    pub fn codec_name(&self) -> &'static str {
        match self {
            Self::Deflate { .. } => "deflate",
            Self::Gzip => "gzip",
            Self::Shuffle { .. } => "shuffle",
            Self::Fletcher32 => "fletcher32",
            Self::Szip => "szip",
            Self::Nbit => "nbit",
            Self::Scaleoffset => "scaleoffset",
            Self::Bzip2 => "bzip2",
            Self::Zstd => "zstd",
            Self::Blosc => "blosc",
            Self::Lz4 => "lz4",
        }
    }

    /// Whether the filter pipeline can decode this stage.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::Deflate { .. } | Self::Gzip | Self::Shuffle { .. } | Self::Fletcher32
        )
    }
}

/// Selection of a single dimension of a hyperslab
///
/// Selects the indices `start, start + stride, ..., start + (count - 1) * stride`.
// NOTE: In serde, structs can be deserialised from sequences or maps. This allows us to support
// the [<start>, <stride>, <count>] form, with the convenience of named fields.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DimSelection {
    /// First selected index
    pub start: usize,
    /// Distance between selected indices
    pub stride: usize,
    /// Number of selected indices
    pub count: usize,
}

impl DimSelection {
    /// Return a new DimSelection object.
    pub fn new(start: usize, stride: usize, count: usize) -> Self {
        DimSelection {
            start,
            stride,
            count,
        }
    }

    /// Returns the last selected index, or `None` if the count is zero or the index overflows.
    pub fn last(&self) -> Option<usize> {
        let steps = self.count.checked_sub(1)?;
        steps
            .checked_mul(self.stride)
            .and_then(|span| span.checked_add(self.start))
    }
}

impl FromStr for DimSelection {
    type Err = String;

    /// Parse `start:stride:count`, or `start:count` with a unit stride.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|err| format!("invalid selection component {:?}: {}", part, err))
        };
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [start, count] => Ok(Self::new(parse(start)?, 1, parse(count)?)),
            [start, stride, count] => Ok(Self::new(parse(start)?, parse(stride)?, parse(count)?)),
            _ => Err(format!(
                "invalid selection {:?}, expected start:stride:count",
                s
            )),
        }
    }
}

/// A regularly strided rectangular subset of an array
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Hyperslab {
    dims: Vec<DimSelection>,
}

impl Hyperslab {
    /// Return a new Hyperslab from per-dimension selections.
    pub fn new(dims: Vec<DimSelection>) -> Self {
        Hyperslab { dims }
    }

    /// Return a Hyperslab selecting every element of an array with the given shape.
    pub fn full(shape: &[usize]) -> Self {
        Self::new(
            shape
                .iter()
                .map(|extent| DimSelection::new(0, 1, *extent))
                .collect(),
        )
    }

    /// Per-dimension selections.
    pub fn dims(&self) -> &[DimSelection] {
        &self.dims
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Shape of the selected subset.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|dim| dim.count).collect()
    }

    /// Number of selected elements, or `None` if it overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(dim.count))
    }

    /// Check that the hyperslab lies within an array of the given shape.
    ///
    /// Every dimension must have a stride and count of at least one and a last selected index
    /// inside the array extent.
    pub fn validate(&self, shape: &[usize]) -> Result<(), ReconstructionError> {
        if self.rank() != shape.len() {
            return Err(ReconstructionError::OutOfRange {
                dimension: None,
                reason: format!(
                    "hyperslab rank {} does not match array rank {}",
                    self.rank(),
                    shape.len()
                ),
            });
        }
        for (dimension, (dim, extent)) in self.dims.iter().zip(shape).enumerate() {
            if dim.stride == 0 {
                return Err(ReconstructionError::out_of_range(
                    dimension,
                    "stride must be greater than 0",
                ));
            }
            if dim.count == 0 {
                return Err(ReconstructionError::out_of_range(
                    dimension,
                    "count must be greater than 0",
                ));
            }
            if dim.start >= *extent {
                return Err(ReconstructionError::out_of_range(
                    dimension,
                    format!("start {} is not less than extent {}", dim.start, extent),
                ));
            }
            match dim.last() {
                Some(last) if last < *extent => (),
                Some(last) => {
                    return Err(ReconstructionError::out_of_range(
                        dimension,
                        format!("last index {} is not less than extent {}", last, extent),
                    ))
                }
                None => {
                    return Err(ReconstructionError::out_of_range(
                        dimension,
                        "last index overflows",
                    ))
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Hyperslab {
    type Err = String;

    /// Parse a comma separated list of [DimSelection]s.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims = s
            .split(',')
            .map(DimSelection::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(dims))
    }
}
