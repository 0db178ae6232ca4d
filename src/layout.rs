//! Layout of a chunked array
//!
//! A [Layout] describes how a variable's data is stored as a grid of independently addressable,
//! independently encoded chunks. It is validated once on construction by [LayoutBuilder::build]
//! and is immutable afterwards, so it can be shared by reference between concurrent tasks.

use std::collections::btree_map::{BTreeMap, Entry};

use crate::error::ReconstructionError;
use crate::models::{ChunkCoord, ElementType, Filter};
use crate::types::fill_value::fill_bytes;
use crate::types::{ByteOrder, FillValue};

/// Storage location of a single chunk
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkLocation {
    /// Location identifier understood by the retrieval backend (URL or path)
    pub location: String,
    /// Offset in bytes of the chunk within the location
    pub offset: u64,
    /// Length in bytes of the stored (encoded) chunk
    pub length: u64,
}

impl ChunkLocation {
    /// Return a new ChunkLocation object.
    pub fn new(location: impl Into<String>, offset: u64, length: u64) -> Self {
        ChunkLocation {
            location: location.into(),
            offset,
            length,
        }
    }

    /// Offset of the first byte past the chunk.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// Mapping from chunk coordinate to storage location
///
/// Coordinates that are absent denote chunks that were never written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkIndex {
    entries: BTreeMap<ChunkCoord, ChunkLocation>,
}

impl ChunkIndex {
    /// Return an empty ChunkIndex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk. Each coordinate may be added at most once.
    pub fn insert(
        &mut self,
        coord: ChunkCoord,
        location: ChunkLocation,
    ) -> Result<(), ReconstructionError> {
        match self.entries.entry(coord) {
            Entry::Occupied(entry) => Err(ReconstructionError::manifest(format!(
                "chunk {:?} is listed more than once",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(location);
                Ok(())
            }
        }
    }

    /// Returns the storage location of a chunk, or `None` if it was never written.
    pub fn get(&self, coord: &[usize]) -> Option<&ChunkLocation> {
        self.entries.get(coord)
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over stored chunks in row-major coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (&ChunkCoord, &ChunkLocation)> {
        self.entries.iter()
    }
}

/// Validated description of a chunked array
#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    grid_shape: Vec<usize>,
    element_type: ElementType,
    byte_order: ByteOrder,
    fill_value: Option<FillValue>,
    fill_bytes: Vec<u8>,
    filters: Vec<Filter>,
    chunk_index: ChunkIndex,
    chunk_byte_size: usize,
}

impl Layout {
    /// Return a builder for a layout with the given array shape, chunk shape and element type.
    pub fn builder(
        shape: Vec<usize>,
        chunk_shape: Vec<usize>,
        element_type: ElementType,
    ) -> LayoutBuilder {
        LayoutBuilder {
            shape,
            chunk_shape,
            element_type,
            byte_order: ByteOrder::default(),
            fill_value: None,
            filters: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Extent of each array dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Extent of each chunk dimension.
    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    /// Number of chunks along each dimension, including partially filled edge chunks.
    pub fn grid_shape(&self) -> &[usize] {
        &self.grid_shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Size in bytes of one element.
    pub fn element_size(&self) -> usize {
        self.element_type.size_of()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn fill_value(&self) -> Option<&FillValue> {
        self.fill_value.as_ref()
    }

    /// One element holding the fill value, in host byte order. Zero if no fill value is declared.
    pub fn fill_bytes(&self) -> &[u8] {
        &self.fill_bytes
    }

    /// Filter pipeline in storage to memory order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.chunk_index
    }

    /// Size in bytes of a fully decoded chunk. Edge chunks are stored at full size.
    pub fn chunk_byte_size(&self) -> usize {
        self.chunk_byte_size
    }
}

/// Builder for a [Layout]
#[derive(Clone, Debug)]
pub struct LayoutBuilder {
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    element_type: ElementType,
    byte_order: ByteOrder,
    fill_value: Option<FillValue>,
    filters: Vec<Filter>,
    chunks: Vec<(ChunkCoord, ChunkLocation)>,
}

impl LayoutBuilder {
    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn fill_value(mut self, fill_value: Option<FillValue>) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Add a stored chunk at a grid coordinate.
    pub fn chunk(mut self, coord: ChunkCoord, location: ChunkLocation) -> Self {
        self.chunks.push((coord, location));
        self
    }

    /// Validate and build the layout.
    ///
    /// # Errors
    ///
    /// * [ReconstructionError::Manifest] if a structural invariant is violated: rank mismatch,
    ///   zero extent, chunk extent larger than the array extent, a chunk coordinate outside the
    ///   chunk grid or listed twice, or a zero length chunk.
    /// * [ReconstructionError::UnsupportedEncoding] for variable length strings or a filter that
    ///   cannot be decoded.
    pub fn build(self) -> Result<Layout, ReconstructionError> {
        let rank = self.shape.len();
        if rank == 0 {
            return Err(ReconstructionError::manifest("array rank must be at least 1"));
        }
        if self.chunk_shape.len() != rank {
            return Err(ReconstructionError::manifest(format!(
                "chunk rank {} does not match array rank {}",
                self.chunk_shape.len(),
                rank
            )));
        }
        for (dimension, (extent, chunk_extent)) in
            self.shape.iter().zip(&self.chunk_shape).enumerate()
        {
            if *extent == 0 {
                return Err(ReconstructionError::manifest(format!(
                    "array extent of dimension {} must be greater than 0",
                    dimension
                )));
            }
            if *chunk_extent == 0 {
                return Err(ReconstructionError::manifest(format!(
                    "chunk extent of dimension {} must be greater than 0",
                    dimension
                )));
            }
            if chunk_extent > extent {
                return Err(ReconstructionError::manifest(format!(
                    "chunk extent {} of dimension {} exceeds array extent {}",
                    chunk_extent, dimension, extent
                )));
            }
        }

        if self.element_type == ElementType::VariableString {
            return Err(ReconstructionError::unsupported(
                "arrays of variable length strings",
            ));
        }
        for filter in &self.filters {
            if !filter.is_supported() {
                return Err(ReconstructionError::unsupported(format!(
                    "{} filter",
                    filter.codec_name()
                )));
            }
            if let Filter::Shuffle {
                element_size: Some(0),
            } = filter
            {
                return Err(ReconstructionError::manifest(
                    "shuffle element size must be greater than 0",
                ));
            }
        }

        let element_size = self.element_type.size_of();
        if element_size == 0 {
            return Err(ReconstructionError::manifest(
                "element size must be greater than 0",
            ));
        }
        if self
            .shape
            .iter()
            .try_fold(element_size, |size, extent| size.checked_mul(*extent))
            .is_none()
        {
            return Err(ReconstructionError::manifest(format!(
                "array of shape {:?} overflows the address space",
                self.shape
            )));
        }
        let chunk_byte_size = self
            .chunk_shape
            .iter()
            .try_fold(element_size, |size, extent| size.checked_mul(*extent))
            .ok_or_else(|| ReconstructionError::manifest("chunk size overflows"))?;
        let fill_bytes = fill_bytes(self.fill_value.as_ref(), self.element_type)?;

        let grid_shape: Vec<usize> = self
            .shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(extent, chunk_extent)| extent.div_ceil(*chunk_extent))
            .collect();

        let mut chunk_index = ChunkIndex::new();
        for (coord, location) in self.chunks {
            if coord.len() != rank {
                return Err(ReconstructionError::manifest(format!(
                    "chunk {:?} rank does not match array rank {}",
                    coord, rank
                )));
            }
            if coord.iter().zip(&grid_shape).any(|(index, grid)| index >= grid) {
                return Err(ReconstructionError::manifest(format!(
                    "chunk {:?} lies outside chunk grid {:?}",
                    coord, grid_shape
                )));
            }
            if location.length == 0 {
                return Err(ReconstructionError::manifest(format!(
                    "chunk {:?} has zero length",
                    coord
                )));
            }
            if location.end().is_none() {
                return Err(ReconstructionError::manifest(format!(
                    "chunk {:?} byte range overflows",
                    coord
                )));
            }
            chunk_index.insert(coord, location)?;
        }

        Ok(Layout {
            shape: self.shape,
            chunk_shape: self.chunk_shape,
            grid_shape,
            element_type: self.element_type,
            byte_order: self.byte_order,
            fill_value: self.fill_value,
            fill_bytes,
            filters: self.filters,
            chunk_index,
            chunk_byte_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> LayoutBuilder {
        Layout::builder(vec![100], vec![10], ElementType::Int32)
    }

    #[test]
    fn test_build() {
        let layout = builder()
            .fill_value(Some((-1).into()))
            .filters(vec![Filter::Deflate { level: None }])
            .chunk(vec![0], ChunkLocation::new("file:///data", 0, 40))
            .chunk(vec![1], ChunkLocation::new("file:///data", 40, 40))
            .build()
            .unwrap();
        assert_eq!(&[100], layout.shape());
        assert_eq!(&[10], layout.grid_shape());
        assert_eq!(4, layout.element_size());
        assert_eq!(40, layout.chunk_byte_size());
        assert_eq!((-1_i32).to_ne_bytes(), layout.fill_bytes());
        assert_eq!(2, layout.chunk_index().len());
        assert_eq!(
            Some(&ChunkLocation::new("file:///data", 40, 40)),
            layout.chunk_index().get(&[1])
        );
        assert_eq!(None, layout.chunk_index().get(&[2]));
    }

    #[test]
    fn test_partial_edge_chunks() {
        let layout = Layout::builder(vec![10, 7], vec![4, 3], ElementType::Float64)
            .chunk(vec![2, 2], ChunkLocation::new("a", 0, 96))
            .build()
            .unwrap();
        assert_eq!(&[3, 3], layout.grid_shape());
        assert_eq!(96, layout.chunk_byte_size());
    }

    #[test]
    fn test_default_fill_is_zero() {
        let layout = builder().build().unwrap();
        assert_eq!(&[0, 0, 0, 0], layout.fill_bytes());
        assert_eq!(ByteOrder::Little, layout.byte_order());
    }

    #[test]
    #[should_panic(expected = "array rank must be at least 1")]
    fn test_rank_zero() {
        Layout::builder(vec![], vec![], ElementType::Int32)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk rank 1 does not match array rank 2")]
    fn test_rank_mismatch() {
        Layout::builder(vec![10, 10], vec![5], ElementType::Int32)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk extent of dimension 1 must be greater than 0")]
    fn test_zero_chunk_extent() {
        Layout::builder(vec![10, 10], vec![5, 0], ElementType::Int32)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "array extent of dimension 0 must be greater than 0")]
    fn test_zero_array_extent() {
        Layout::builder(vec![0], vec![0], ElementType::Int32)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk extent 11 of dimension 0 exceeds array extent 10")]
    fn test_chunk_larger_than_array() {
        Layout::builder(vec![10], vec![11], ElementType::Int32)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "UnsupportedEncoding { encoding: \"arrays of variable length strings\" }")]
    fn test_variable_string() {
        Layout::builder(vec![10], vec![5], ElementType::VariableString)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "element size must be greater than 0")]
    fn test_zero_length_fixed_string() {
        Layout::builder(vec![10], vec![5], ElementType::FixedString(0))
            .build()
            .unwrap();
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic(expected = "array of shape [8589934592, 8589934592] overflows the address space")]
    fn test_array_size_overflow() {
        Layout::builder(vec![1 << 33, 1 << 33], vec![1, 1 << 20], ElementType::Uint8)
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "UnsupportedEncoding { encoding: \"szip filter\" }")]
    fn test_unsupported_filter() {
        builder()
            .filters(vec![Filter::Shuffle { element_size: None }, Filter::Szip])
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "shuffle element size must be greater than 0")]
    fn test_zero_shuffle_element_size() {
        builder()
            .filters(vec![Filter::Shuffle {
                element_size: Some(0),
            }])
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk [3] is listed more than once")]
    fn test_duplicate_chunk() {
        builder()
            .chunk(vec![3], ChunkLocation::new("a", 0, 40))
            .chunk(vec![3], ChunkLocation::new("a", 40, 40))
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk [10] lies outside chunk grid [10]")]
    fn test_chunk_outside_grid() {
        builder()
            .chunk(vec![10], ChunkLocation::new("a", 0, 40))
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk [0, 0] rank does not match array rank 1")]
    fn test_chunk_rank_mismatch() {
        builder()
            .chunk(vec![0, 0], ChunkLocation::new("a", 0, 40))
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk [0] has zero length")]
    fn test_zero_length_chunk() {
        builder()
            .chunk(vec![0], ChunkLocation::new("a", 0, 0))
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "chunk [0] byte range overflows")]
    fn test_chunk_range_overflow() {
        builder()
            .chunk(vec![0], ChunkLocation::new("a", u64::MAX, 2))
            .build()
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "fill value 300 is not representable as u8")]
    fn test_incompatible_fill_value() {
        Layout::builder(vec![10], vec![5], ElementType::Uint8)
            .fill_value(Some(300.into()))
            .build()
            .unwrap();
    }

    #[test]
    fn test_chunk_index_iter_is_row_major() {
        let mut index = ChunkIndex::new();
        index.insert(vec![1, 0], ChunkLocation::new("a", 0, 1)).unwrap();
        index.insert(vec![0, 1], ChunkLocation::new("a", 1, 1)).unwrap();
        index.insert(vec![0, 0], ChunkLocation::new("a", 2, 1)).unwrap();
        let coords: Vec<&ChunkCoord> = index.iter().map(|(coord, _)| coord).collect();
        assert_eq!(vec![&vec![0, 0], &vec![0, 1], &vec![1, 0]], coords);
    }
}
