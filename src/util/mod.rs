//! # Utility Modules
//!
//! Common helpers used throughout the sbc-hal crate: the bit-field codec,
//! byte-order composition, bounded busy-polling and logging patterns.

pub mod bits;
pub mod bytes;
pub mod logging;
pub mod wait;

// Re-export commonly used types and functions
pub use bits::{extract_bits, is_bit_set, merge_bits, set_bit, BitField};
pub use bytes::{get_uint, put_uint, ByteOrder};
pub use logging::{log_transfer_hex, KeyedThrottle, LogThrottle};
pub use wait::{wait_until, WaitOutcome};
