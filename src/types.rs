pub mod byte_order;
pub mod dvalue;
pub mod fill_value;

// Re-export types for convenience.
pub use crate::types::byte_order::ByteOrder;
pub use crate::types::dvalue::DValue;
pub use crate::types::fill_value::FillValue;
