//! Fletcher-32 checksum filter

use bytes::Bytes;

use crate::error::{DecodeError, DecodeFailureKind};

const CODEC: &str = "fletcher32";

/// Size in bytes of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Compute the HDF5 variant of the Fletcher-32 checksum.
///
/// Data is summed as big-endian 16-bit words. An odd trailing byte is treated as the high byte
/// of a final word.
pub fn checksum(data: &[u8]) -> u32 {
    // 360 words is the largest block for which neither sum can overflow before reduction.
    const BLOCK_BYTES: usize = 360 * 2;

    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    let mut blocks = data.chunks(BLOCK_BYTES);
    for block in &mut blocks {
        let mut words = block.chunks_exact(2);
        for word in &mut words {
            sum1 += u32::from(u16::from_be_bytes([word[0], word[1]]));
            sum2 += sum1;
        }
        if let [last] = words.remainder() {
            sum1 += u32::from(*last) << 8;
            sum2 += sum1;
        }
        sum1 %= 65535;
        sum2 %= 65535;
    }
    (sum2 << 16) | sum1
}

/// Verify the trailing checksum of `data` and return the payload without it.
///
/// The checksum is stored in the last four bytes, little-endian.
pub fn verify(data: Bytes) -> Result<Bytes, DecodeError> {
    if data.len() < CHECKSUM_SIZE {
        return Err(DecodeError::new(
            CODEC,
            DecodeFailureKind::Malformed,
            format!("{} bytes is too short to hold a checksum", data.len()),
        ));
    }
    let split = data.len() - CHECKSUM_SIZE;
    let mut stored = [0; 4];
    stored.copy_from_slice(&data[split..]);
    let stored = u32::from_le_bytes(stored);
    let computed = checksum(&data[..split]);
    if stored != computed {
        return Err(DecodeError::new(
            CODEC,
            DecodeFailureKind::Corrupt,
            format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            ),
        ));
    }
    Ok(data.slice(..split))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_zeros() {
        assert_eq!(0, checksum(&[0; 16]));
    }

    #[test]
    fn test_checksum_known_value() {
        // Words 0x0102, 0x0304: sum1 = 0x0406, sum2 = 0x0102 + 0x0406 = 0x0508.
        assert_eq!(0x0508_0406, checksum(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_checksum_odd_length() {
        // Trailing byte is the high byte of a final word.
        assert_eq!(checksum(&[1, 2, 3, 0]), checksum(&[1, 2, 3]));
    }

    #[test]
    fn test_checksum_large_input() {
        // Exercise the block reduction against a direct modular computation.
        let data: Vec<u8> = (0..10_000_u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut sum1: u64 = 0;
        let mut sum2: u64 = 0;
        for word in data.chunks_exact(2) {
            sum1 = (sum1 + u64::from(u16::from_be_bytes([word[0], word[1]]))) % 65535;
            sum2 = (sum2 + sum1) % 65535;
        }
        assert_eq!(((sum2 << 16) | sum1) as u32, checksum(&data));
    }

    #[test]
    fn test_verify() {
        let data = vec![1_u8, 2, 3, 4, 5, 6, 7, 8];
        let with_checksum = test_utils::append(&data);
        assert_eq!(data.len() + 4, with_checksum.len());
        let verified = verify(with_checksum.into()).unwrap();
        assert_eq!(data.as_slice(), verified);
    }

    #[test]
    fn test_verify_corrupt_payload() {
        let mut with_checksum = test_utils::append(&[1, 2, 3, 4]);
        with_checksum[0] ^= 0xff;
        let err = verify(with_checksum.into()).unwrap_err();
        assert_eq!(DecodeFailureKind::Corrupt, err.kind);
        assert_eq!("fletcher32", err.codec);
    }

    #[test]
    fn test_verify_too_short() {
        let err = verify(Bytes::from_static(&[1, 2, 3])).unwrap_err();
        assert_eq!(DecodeFailureKind::Malformed, err.kind);
    }
}
