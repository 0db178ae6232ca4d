use serde::Deserialize;

use crate::models::ElementType;

#[cfg(target_endian = "big")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

#[cfg(target_endian = "little")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

#[cfg(target_endian = "big")]
pub const NON_NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

#[cfg(target_endian = "little")]
pub const NON_NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

/// Byte order / endianness of stored elements.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Big Endian
    Big,
    /// Little Endian
    #[default]
    Little,
}

impl ByteOrder {
    /// Whether elements of a type stored in this byte order must be swapped to reach host order.
    pub fn needs_swap(self, element_type: ElementType) -> bool {
        self != NATIVE_BYTE_ORDER && element_type.is_byte_order_sensitive()
    }
}

/// Reverse the bytes of each `element_size` sized element of `data` in place.
pub fn swap_in_place(data: &mut [u8], element_size: usize) {
    if element_size < 2 {
        return;
    }
    for element in data.chunks_exact_mut(element_size) {
        element.reverse();
    }
}
