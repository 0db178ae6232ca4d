//! JSON chunk manifests
//!
//! A manifest describes a chunked array variable: its shape, chunk shape, element type, byte
//! order, fill value and filter pipeline, and the storage location of every stored chunk.
//!
//! ```json
//! {
//!   "name": "temperature",
//!   "shape": [100, 20],
//!   "chunk_shape": [10, 20],
//!   "dtype": "float32",
//!   "byte_order": "big",
//!   "fill_value": "-999.0",
//!   "data_url": "s3://bucket/temperature.h5",
//!   "filters": [{"id": "deflate", "level": 4}, {"id": "shuffle"}],
//!   "chunks": [
//!     {"position": [0, 0], "offset": 4016, "size": 1733},
//!     {"position_in_array": [10, 0], "offset": 5749, "size": 1701}
//!   ]
//! }
//! ```

use std::path::Path;

use crate::error::ReconstructionError;
use crate::layout::{ChunkLocation, Layout};
use crate::models::{ChunkCoord, DType, ElementType, Filter};
use crate::types::{ByteOrder, FillValue};

use serde::Deserialize;
use validator::{Validate, ValidationError};

/// Storage of a single chunk
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_chunk_entry"))]
pub struct ChunkEntry {
    /// Position of the chunk in the chunk grid
    pub position: Option<Vec<usize>>,
    /// Index of the chunk's first element in the array
    pub position_in_array: Option<Vec<usize>>,
    /// Offset in bytes of the chunk within its object
    pub offset: u64,
    /// Number of stored bytes
    #[validate(range(min = 1, message = "size must be greater than 0"))]
    pub size: u64,
    /// Object holding the chunk, if different from the manifest's
    pub data_url: Option<String>,
}

/// Manifest of a chunked array variable
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_manifest"))]
pub struct Manifest {
    /// Name of the variable
    pub name: Option<String>,
    /// Shape of the array
    #[validate(
        length(min = 1, message = "shape length must be greater than 0"),
        custom = "validate_shape"
    )]
    pub shape: Vec<usize>,
    /// Shape of each chunk
    #[validate(
        length(min = 1, message = "chunk_shape length must be greater than 0"),
        custom = "validate_shape"
    )]
    pub chunk_shape: Vec<usize>,
    /// Data type
    pub dtype: DType,
    /// Length in bytes of fixed length strings
    pub string_length: Option<usize>,
    /// Byte order of stored elements
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Value of elements in chunks that were never written
    pub fill_value: Option<FillValue>,
    /// Object holding the chunks
    pub data_url: Option<String>,
    /// Filter pipeline, in storage to memory order
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Stored chunks
    #[validate]
    #[serde(default)]
    pub chunks: Vec<ChunkEntry>,
}

/// Validate an array shape
fn validate_shape(shape: &[usize]) -> Result<(), ValidationError> {
    if shape.iter().any(|index| *index == 0) {
        return Err(ValidationError::new("shape indices must be greater than 0"));
    }
    Ok(())
}

/// Validate that a chunk has exactly one kind of position
fn validate_chunk_entry(entry: &ChunkEntry) -> Result<(), ValidationError> {
    match (&entry.position, &entry.position_in_array) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new(
            "chunk must have exactly one of position and position_in_array",
        )),
    }
}

/// Validate that the array and chunk shapes are consistent
fn validate_manifest(manifest: &Manifest) -> Result<(), ValidationError> {
    if manifest.shape.len() != manifest.chunk_shape.len() {
        let mut error = ValidationError::new("shape and chunk_shape must have the same length");
        error.add_param("shape".into(), &manifest.shape.len());
        error.add_param("chunk_shape".into(), &manifest.chunk_shape.len());
        return Err(error);
    }
    Ok(())
}

impl Manifest {
    /// Parse and validate a JSON manifest.
    pub fn from_json(json: &str) -> Result<Self, ReconstructionError> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|err| ReconstructionError::manifest_caused_by("failed to parse", err))?;
        manifest
            .validate()
            .map_err(|err| ReconstructionError::manifest_caused_by("validation failed", err))?;
        Ok(manifest)
    }

    /// Read, parse and validate a JSON manifest file.
    pub async fn load(path: &Path) -> Result<Self, ReconstructionError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|err| {
            ReconstructionError::manifest_caused_by(
                format!("failed to read {}", path.display()),
                err,
            )
        })?;
        Self::from_json(&json)
    }

    /// Grid coordinate of a chunk entry.
    fn chunk_coord(&self, entry: &ChunkEntry) -> Result<ChunkCoord, ReconstructionError> {
        match (&entry.position, &entry.position_in_array) {
            (Some(position), _) => Ok(position.clone()),
            (None, Some(element)) => {
                if element.len() != self.chunk_shape.len() {
                    return Err(ReconstructionError::manifest(format!(
                        "chunk position_in_array {:?} has rank {}, expected {}",
                        element,
                        element.len(),
                        self.chunk_shape.len()
                    )));
                }
                element
                    .iter()
                    .zip(&self.chunk_shape)
                    .map(|(index, extent)| {
                        if index % extent != 0 {
                            return Err(ReconstructionError::manifest(format!(
                                "chunk position_in_array {:?} is not aligned to chunk_shape {:?}",
                                element, self.chunk_shape
                            )));
                        }
                        Ok(index / extent)
                    })
                    .collect()
            }
            (None, None) => Err(ReconstructionError::manifest(
                "chunk must have exactly one of position and position_in_array",
            )),
        }
    }

    /// Build a validated [Layout] from the manifest.
    ///
    /// # Errors
    ///
    /// * [ReconstructionError::Manifest] if the manifest is inconsistent
    /// * [ReconstructionError::UnsupportedEncoding] if the element type or a filter cannot be
    ///   decoded
    pub fn into_layout(self) -> Result<Layout, ReconstructionError> {
        let element_type = ElementType::from_dtype(self.dtype, self.string_length)?;
        let mut builder = Layout::builder(self.shape.clone(), self.chunk_shape.clone(), element_type)
            .byte_order(self.byte_order)
            .fill_value(self.fill_value.clone())
            .filters(self.filters.clone());
        for entry in &self.chunks {
            let coord = self.chunk_coord(entry)?;
            let location = entry
                .data_url
                .as_ref()
                .or(self.data_url.as_ref())
                .ok_or_else(|| {
                    ReconstructionError::manifest(format!(
                        "chunk {:?} has no data_url and the manifest declares none",
                        coord
                    ))
                })?;
            builder = builder.chunk(
                coord,
                ChunkLocation::new(location.as_str(), entry.offset, entry.size),
            );
        }
        builder.build()
    }
}

/// Parse a JSON manifest into a [Layout].
pub fn parse_manifest(json: &str) -> Result<Layout, ReconstructionError> {
    Manifest::from_json(json)?.into_layout()
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};

    fn manifest_json(extra: &str) -> String {
        format!(
            r#"{{
                "shape": [20, 4],
                "chunk_shape": [10, 4],
                "dtype": "int32",
                "data_url": "s3://bucket/data.h5",
                "chunks": [
                    {{"position": [0, 0], "offset": 100, "size": 160}},
                    {{"position_in_array": [10, 0], "offset": 260, "size": 160,
                      "data_url": "https://example.com/other.h5"}}
                ]{}
            }}"#,
            extra
        )
    }

    #[test]
    fn test_chunk_entry_tokens() {
        assert_de_tokens(
            &ChunkEntry {
                position: Some(vec![1, 2]),
                position_in_array: None,
                offset: 10,
                size: 5,
                data_url: None,
            },
            &[
                Token::Struct {
                    name: "ChunkEntry",
                    len: 3,
                },
                Token::Str("position"),
                Token::Some,
                Token::Seq { len: Some(2) },
                Token::U64(1),
                Token::U64(2),
                Token::SeqEnd,
                Token::Str("offset"),
                Token::U64(10),
                Token::Str("size"),
                Token::U64(5),
                Token::StructEnd,
            ],
        );
    }

    #[test]
    fn test_chunk_entry_unknown_field() {
        assert_de_tokens_error::<ChunkEntry>(
            &[
                Token::Struct {
                    name: "ChunkEntry",
                    len: 1,
                },
                Token::Str("length"),
            ],
            "unknown field `length`, expected one of `position`, `position_in_array`, `offset`, `size`, `data_url`",
        );
    }

    #[test]
    fn test_parse_manifest() {
        let layout = parse_manifest(&manifest_json("")).unwrap();
        assert_eq!(&[20, 4], layout.shape());
        assert_eq!(&[2, 1], layout.grid_shape());
        assert_eq!(ElementType::Int32, layout.element_type());
        assert_eq!(ByteOrder::Little, layout.byte_order());
        assert!(layout.filters().is_empty());
        assert_eq!(
            Some(&ChunkLocation::new("s3://bucket/data.h5", 100, 160)),
            layout.chunk_index().get(&[0, 0])
        );
        assert_eq!(
            Some(&ChunkLocation::new("https://example.com/other.h5", 260, 160)),
            layout.chunk_index().get(&[1, 0])
        );
    }

    #[test]
    fn test_parse_manifest_optional_fields() {
        let extra = r#",
            "name": "var",
            "byte_order": "big",
            "fill_value": "-1",
            "filters": [{"id": "zlib"}, {"id": "shuffle", "element_size": 4}]"#;
        let layout = parse_manifest(&manifest_json(extra)).unwrap();
        assert_eq!(ByteOrder::Big, layout.byte_order());
        assert_eq!(Some(&FillValue::from("-1")), layout.fill_value());
        assert_eq!(&(-1_i32).to_ne_bytes(), layout.fill_bytes());
        assert_eq!(
            &[
                Filter::Deflate { level: None },
                Filter::Shuffle {
                    element_size: Some(4)
                }
            ],
            layout.filters()
        );
    }

    #[test]
    fn test_unknown_filter() {
        let extra = r#", "filters": [{"id": "rot13"}]"#;
        let err = parse_manifest(&manifest_json(extra)).unwrap_err();
        assert_eq!("invalid manifest: failed to parse", err.to_string());
    }

    #[test]
    fn test_unsupported_filter() {
        let extra = r#", "filters": [{"id": "szip"}]"#;
        let err = parse_manifest(&manifest_json(extra)).unwrap_err();
        assert!(matches!(err, ReconstructionError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn test_variable_string_unsupported() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "variable_string"}"#;
        let err = parse_manifest(json).unwrap_err();
        assert_eq!(
            "unsupported encoding: arrays of variable length strings",
            err.to_string()
        );
    }

    #[test]
    fn test_fixed_string() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "fixed_string",
                       "string_length": 8, "fill_value": "n/a"}"#;
        let layout = parse_manifest(json).unwrap();
        assert_eq!(ElementType::FixedString(8), layout.element_type());
        assert_eq!(b"n/a\0\0\0\0\0", layout.fill_bytes());
        assert!(layout.chunk_index().is_empty());
    }

    #[test]
    fn test_shape_rank_mismatch() {
        let json = r#"{"shape": [4, 4], "chunk_shape": [2], "dtype": "uint8"}"#;
        let err = parse_manifest(json).unwrap_err();
        assert_eq!("invalid manifest: validation failed", err.to_string());
    }

    #[test]
    fn test_zero_extent() {
        let json = r#"{"shape": [0], "chunk_shape": [1], "dtype": "uint8"}"#;
        assert!(matches!(
            parse_manifest(json).unwrap_err(),
            ReconstructionError::Manifest { .. }
        ));
    }

    #[test]
    fn test_zero_chunk_size() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "uint8", "data_url": "a",
                       "chunks": [{"position": [0], "offset": 0, "size": 0}]}"#;
        let err = Manifest::from_json(json).unwrap_err();
        assert_eq!("invalid manifest: validation failed", err.to_string());
    }

    #[test]
    fn test_chunk_without_position() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "uint8", "data_url": "a",
                       "chunks": [{"offset": 0, "size": 2}]}"#;
        assert!(Manifest::from_json(json).is_err());
    }

    #[test]
    fn test_misaligned_position_in_array() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "uint8", "data_url": "a",
                       "chunks": [{"position_in_array": [1], "offset": 0, "size": 2}]}"#;
        let err = parse_manifest(json).unwrap_err();
        assert_eq!(
            "invalid manifest: chunk position_in_array [1] is not aligned to chunk_shape [2]",
            err.to_string()
        );
    }

    #[test]
    fn test_chunk_without_data_url() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "uint8",
                       "chunks": [{"position": [1], "offset": 0, "size": 2}]}"#;
        let err = parse_manifest(json).unwrap_err();
        assert_eq!(
            "invalid manifest: chunk [1] has no data_url and the manifest declares none",
            err.to_string()
        );
    }

    #[test]
    fn test_duplicate_chunk() {
        let json = r#"{"shape": [4], "chunk_shape": [2], "dtype": "uint8", "data_url": "a",
                       "chunks": [{"position": [1], "offset": 0, "size": 2},
                                  {"position_in_array": [2], "offset": 2, "size": 2}]}"#;
        let err = parse_manifest(json).unwrap_err();
        assert_eq!(
            "invalid manifest: chunk [1] is listed more than once",
            err.to_string()
        );
    }

    #[tokio::test]
    async fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, manifest_json("")).unwrap();
        let manifest = Manifest::load(&path).await.unwrap();
        assert_eq!(2, manifest.chunks.len());
        assert!(Manifest::load(&dir.path().join("missing.json")).await.is_err());
    }
}
