//! Hyperslab intersection with the chunk grid
//!
//! Each dimension is intersected independently in closed form. For a selection
//! `start, start + stride, ..., start + (count - 1) * stride` and a chunk covering
//! `[lo, hi]`, the selected positions falling inside the chunk are `k_first..=k_last` where
//!
//! * `k_first = ceil((lo - start) / stride)`, or 0 if `lo <= start`
//! * `k_last = min(count - 1, floor((hi - start) / stride))`
//!
//! and there is no overlap when `hi < start` or `k_first > k_last`. A chunk overlaps the
//! hyperslab only if it overlaps in every dimension, so the cross product is formed from the
//! overlapping chunk indices of each dimension alone.

use crate::error::ReconstructionError;
use crate::layout::{ChunkLocation, Layout};
use crate::models::{ChunkCoord, DimSelection, Hyperslab};

/// Overlap of a hyperslab with one chunk along one dimension
///
/// Selects `count` elements starting at `chunk_start` within the chunk, stepping by the
/// hyperslab's stride, and writes them to consecutive positions from `output_start` in the
/// output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DimRun {
    /// First selected index within the chunk
    pub chunk_start: usize,
    /// First written index within the output
    pub output_start: usize,
    /// Number of selected indices
    pub count: usize,
    /// Step between selected indices within the chunk
    pub stride: usize,
}

/// A chunk overlapping the hyperslab, and the overlapping region in chunk and output space
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkIntersection {
    /// Position of the chunk in the chunk grid
    pub coord: ChunkCoord,
    /// Overlap along each dimension
    pub runs: Vec<DimRun>,
    /// Storage location, or `None` if the chunk was never written and resolves to the fill value
    pub location: Option<ChunkLocation>,
}

impl ChunkIntersection {
    /// Whether the chunk resolves to the fill value without retrieval.
    pub fn is_fill(&self) -> bool {
        self.location.is_none()
    }

    /// Number of output elements written from this chunk.
    pub fn num_elements(&self) -> usize {
        self.runs.iter().map(|run| run.count).product()
    }
}

/// Overlap of one dimension's selection with chunk `index` of extent `chunk_extent`.
fn dim_run(dim: &DimSelection, chunk_extent: usize, index: usize) -> Option<DimRun> {
    let lo = index * chunk_extent;
    let hi = lo + chunk_extent - 1;
    if hi < dim.start {
        return None;
    }
    let k_first = if lo <= dim.start {
        0
    } else {
        (lo - dim.start).div_ceil(dim.stride)
    };
    let k_last = ((hi - dim.start) / dim.stride).min(dim.count - 1);
    if k_first > k_last {
        return None;
    }
    Some(DimRun {
        chunk_start: dim.start + k_first * dim.stride - lo,
        output_start: k_first,
        count: k_last - k_first + 1,
        stride: dim.stride,
    })
}

/// Overlapping chunk indices and runs along one dimension, in ascending order.
fn dim_runs(dim: &DimSelection, chunk_extent: usize, last: usize) -> Vec<(usize, DimRun)> {
    (dim.start / chunk_extent..=last / chunk_extent)
        .filter_map(|index| dim_run(dim, chunk_extent, index).map(|run| (index, run)))
        .collect()
}

/// Enumerate the chunks overlapping a hyperslab.
///
/// Chunks are returned in row-major order of their grid coordinates, with the outermost
/// dimension varying slowest. Only chunks with at least one selected element are returned.
/// Chunks absent from the chunk index are included with no location.
///
/// # Errors
///
/// [ReconstructionError::OutOfRange] if the hyperslab does not lie within the array.
pub fn intersect(
    layout: &Layout,
    hyperslab: &Hyperslab,
) -> Result<Vec<ChunkIntersection>, ReconstructionError> {
    hyperslab.validate(layout.shape())?;

    let per_dim: Vec<Vec<(usize, DimRun)>> = hyperslab
        .dims()
        .iter()
        .zip(layout.chunk_shape())
        .map(|(dim, chunk_extent)| {
            // Validation guarantees the last index exists.
            let last = dim.last().unwrap_or(dim.start);
            dim_runs(dim, *chunk_extent, last)
        })
        .collect();
    if per_dim.iter().any(Vec::is_empty) {
        return Ok(Vec::new());
    }

    let total: usize = per_dim.iter().map(Vec::len).product();
    let mut intersections = Vec::with_capacity(total);
    // Odometer over the per-dimension candidates, last dimension fastest.
    let mut cursor = vec![0_usize; per_dim.len()];
    loop {
        let (coord, runs): (ChunkCoord, Vec<DimRun>) = cursor
            .iter()
            .zip(&per_dim)
            .map(|(position, candidates)| candidates[*position])
            .unzip();
        let location = layout.chunk_index().get(&coord).cloned();
        intersections.push(ChunkIntersection {
            coord,
            runs,
            location,
        });

        let mut dimension = per_dim.len();
        loop {
            if dimension == 0 {
                return Ok(intersections);
            }
            dimension -= 1;
            cursor[dimension] += 1;
            if cursor[dimension] < per_dim[dimension].len() {
                break;
            }
            cursor[dimension] = 0;
        }
    }
}
