//! # Byte-Order Composition
//!
//! Multi-byte register values are composed into an unsigned 32-bit
//! accumulator under an explicit [`ByteOrder`]. The companion encoder
//! [`put_uint`] is the reference used by tests and by writers that need to
//! lay out a value the way a device expects it.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_UINT_BYTES;
use crate::error::HalError;

/// Byte order of a multi-byte register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    /// Most significant byte first (network order).
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

impl std::str::FromStr for ByteOrder {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big" | "be" | "big-endian" => Ok(ByteOrder::BigEndian),
            "little" | "le" | "little-endian" => Ok(ByteOrder::LittleEndian),
            other => Err(HalError::InvalidArgument(format!(
                "unknown byte order '{other}'"
            ))),
        }
    }
}

fn check_uint_length(length: usize) -> Result<(), HalError> {
    if length == 0 || length > MAX_UINT_BYTES {
        return Err(HalError::InvalidArgument(format!(
            "can't create an int for {length} bytes, length must be 1..={MAX_UINT_BYTES}"
        )));
    }
    Ok(())
}

/// Compose `bytes` (1 to 4 of them) into an unsigned integer.
///
/// # Examples
///
/// ```rust
/// use sbc_hal::util::bytes::{get_uint, ByteOrder};
///
/// assert_eq!(get_uint(&[0x12, 0x34], ByteOrder::BigEndian).unwrap(), 0x1234);
/// assert_eq!(get_uint(&[0x12, 0x34], ByteOrder::LittleEndian).unwrap(), 0x3412);
/// ```
pub fn get_uint(bytes: &[u8], order: ByteOrder) -> Result<u32, HalError> {
    check_uint_length(bytes.len())?;

    let fold = |acc: u32, b: &u8| (acc << 8) | u32::from(*b);
    Ok(match order {
        ByteOrder::BigEndian => bytes.iter().fold(0, fold),
        ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
    })
}

/// Lay out the low `length` bytes of `value` in the given order.
///
/// Bits above `length * 8` are discarded.
pub fn put_uint(value: u32, length: usize, order: ByteOrder) -> Result<Vec<u8>, HalError> {
    check_uint_length(length)?;

    let be = value.to_be_bytes();
    let mut out = be[MAX_UINT_BYTES - length..].to_vec();
    if order == ByteOrder::LittleEndian {
        out.reverse();
    }
    Ok(out)
}
