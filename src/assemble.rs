//! Assembly of decoded chunks into the output buffer
//!
//! The output buffer holds the hyperslab's elements in row-major order and host byte order.
//! Each chunk intersection covers a region of the output disjoint from every other
//! intersection, so chunks may be written in any order.

use crate::intersect::{ChunkIntersection, DimRun};
use crate::layout::Layout;
use crate::models::Hyperslab;
use crate::types::byte_order::swap_in_place;

/// Row-major element strides of a shape.
fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Writes chunk intersections into an output buffer.
#[derive(Debug)]
pub struct Assembler<'a> {
    chunk_strides: Vec<usize>,
    output_strides: Vec<usize>,
    element_size: usize,
    swap: bool,
    fill: &'a [u8],
}

impl<'a> Assembler<'a> {
    /// Returns an assembler for reading `hyperslab` from an array with the given layout.
    pub fn new(layout: &'a Layout, hyperslab: &Hyperslab) -> Self {
        Self {
            chunk_strides: strides(layout.chunk_shape()),
            output_strides: strides(&hyperslab.shape()),
            element_size: layout.element_size(),
            swap: layout.byte_order().needs_swap(layout.element_type()),
            fill: layout.fill_bytes(),
        }
    }

    /// Calls `f` with the element offsets in the chunk and in the output of the first element
    /// of each innermost run.
    fn for_each_row(&self, runs: &[DimRun], mut f: impl FnMut(usize, usize)) {
        let Some((inner, outer)) = runs.split_last() else {
            return;
        };
        let rank = runs.len();
        let mut cursor = vec![0_usize; outer.len()];
        loop {
            let mut chunk_offset = inner.chunk_start;
            let mut output_offset = inner.output_start;
            for (d, (run, i)) in outer.iter().zip(&cursor).enumerate() {
                chunk_offset += (run.chunk_start + i * run.stride) * self.chunk_strides[d];
                output_offset += (run.output_start + i) * self.output_strides[d];
            }
            f(chunk_offset, output_offset);

            let mut d = rank - 1;
            loop {
                if d == 0 {
                    return;
                }
                d -= 1;
                cursor[d] += 1;
                if cursor[d] < outer[d].count {
                    break;
                }
                cursor[d] = 0;
            }
        }
    }

    /// Copy the selected elements of a decoded chunk into the output.
    ///
    /// # Arguments
    ///
    /// * `intersection`: The chunk's overlap with the hyperslab
    /// * `chunk`: Decoded chunk in stored byte order, covering the full chunk shape
    /// * `out`: Output buffer for the whole hyperslab
    pub fn write_chunk(&self, intersection: &ChunkIntersection, chunk: &[u8], out: &mut [u8]) {
        let size = self.element_size;
        let Some(inner) = intersection.runs.last() else {
            return;
        };
        self.for_each_row(&intersection.runs, |chunk_offset, output_offset| {
            let dst = &mut out[output_offset * size..(output_offset + inner.count) * size];
            if inner.stride == 1 {
                dst.copy_from_slice(&chunk[chunk_offset * size..][..dst.len()]);
            } else {
                for (k, element) in dst.chunks_exact_mut(size).enumerate() {
                    let src = (chunk_offset + k * inner.stride) * size;
                    element.copy_from_slice(&chunk[src..src + size]);
                }
            }
            if self.swap {
                swap_in_place(dst, size);
            }
        });
    }

    /// Write the fill value to every output element covered by a chunk intersection.
    pub fn write_fill(&self, intersection: &ChunkIntersection, out: &mut [u8]) {
        let size = self.element_size;
        let Some(inner) = intersection.runs.last() else {
            return;
        };
        self.for_each_row(&intersection.runs, |_, output_offset| {
            let dst = &mut out[output_offset * size..(output_offset + inner.count) * size];
            for element in dst.chunks_exact_mut(size) {
                element.copy_from_slice(self.fill);
            }
        });
    }
}
