//! Byte shuffle filter

use bytes::Bytes;

/// Decode the byte shuffle filter.
///
/// The byte shuffle filter encodes data by reordering bytes with the aim of improving compression
/// ratio. For an array of N elements where each element is M bytes, the filter writes the 0th byte
/// of each element first, followed by the 1st byte of each element, and so on. This function
/// inverts the shuffle filter.
///
/// Trailing bytes that do not form a whole element are left in place, as HDF5 does.
///
/// # Arguments
///
/// * `data`: Bytes to deshuffle.
/// * `element_size`: Size of each element in bytes.
// Benchmarking showed that the "slow" vector initialisation was faster for the non-unrolled case.
#[allow(clippy::slow_vector_initialization)]
pub fn deshuffle(data: &[u8], element_size: usize) -> Bytes {
    let num_elements = data.len() / element_size.max(1);
    if element_size <= 1 || num_elements <= 1 {
        return Bytes::copy_from_slice(data);
    }
    let mut result = Vec::with_capacity(data.len());
    // Convert the Vec to a mutable u8 slice to allow indexing.
    // This was benchmarked in benches/shuffle.rs and provides ~50-100% improvement in wall clock
    // time.
    result.resize(data.len(), 0);
    let m = result.as_mut_slice();
    // Unroll the inner loop when element size is 4 or 8.
    let mut dest_index = 0;
    if element_size == 4 {
        for i in 0..num_elements {
            let mut src_index = i;
            for _ in 0..4 {
                m[dest_index] = data[src_index];
                src_index += num_elements;
                dest_index += 1;
            }
        }
    } else if element_size == 8 {
        for i in 0..num_elements {
            m[dest_index] = data[i];
            m[dest_index + 1] = data[i + num_elements];
            m[dest_index + 2] = data[i + 2 * num_elements];
            m[dest_index + 3] = data[i + 3 * num_elements];
            m[dest_index + 4] = data[i + 4 * num_elements];
            m[dest_index + 5] = data[i + 5 * num_elements];
            m[dest_index + 6] = data[i + 6 * num_elements];
            m[dest_index + 7] = data[i + 7 * num_elements];
            dest_index += 8;
        }
    } else {
        for i in 0..num_elements {
            let mut src_index = i;
            for _ in 0..element_size {
                m[dest_index] = data[src_index];
                src_index += num_elements;
                dest_index += 1;
            }
        }
    }
    // Leftover bytes.
    let shuffled_len = num_elements * element_size;
    m[shuffled_len..].copy_from_slice(&data[shuffled_len..]);
    result.into()
}
