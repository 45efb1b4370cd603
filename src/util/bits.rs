//! # Bit-Field Codec
//!
//! Stateless helpers for a single register byte. Bit fields follow the
//! datasheet convention used by i2cdevlib: `start` is the index of the
//! field's most significant bit and the field extends `length` bits towards
//! bit 0.
//!
//! ```text
//! 76543210   bit numbers
//!    xxx     start=4, length=3
//! 00011100   mask
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use sbc_hal::util::bits::{extract_bits, merge_bits, BitField};
//!
//! let field = BitField::new(4, 3).unwrap();
//! assert_eq!(merge_bits(0b1010_1111, field, 0b010), 0b1010_1011);
//! assert_eq!(extract_bits(0b1010_1011, field), 0b010);
//! ```

use crate::constants::MAX_BIT_INDEX;
use crate::error::HalError;

/// A contiguous run of bits inside one byte, addressed MSB-first.
///
/// Always valid by construction: `start <= 7`, `1 <= length <= 8` and the
/// field never crosses bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitField {
    start: u8,
    length: u8,
}

impl BitField {
    /// Validate and build a bit field.
    pub fn new(start: u8, length: u8) -> Result<Self, HalError> {
        if start > MAX_BIT_INDEX {
            return Err(HalError::InvalidArgument(format!(
                "bit field start {start} out of range 0..=7"
            )));
        }
        if length == 0 || length > 8 {
            return Err(HalError::InvalidArgument(format!(
                "bit field length {length} out of range 1..=8"
            )));
        }
        if length > start + 1 {
            return Err(HalError::InvalidArgument(format!(
                "bit field start={start} length={length} runs past bit 0"
            )));
        }
        Ok(Self { start, length })
    }

    /// Index of the field's most significant bit.
    pub fn start(&self) -> u8 {
        self.start
    }

    /// Number of bits in the field.
    pub fn length(&self) -> u8 {
        self.length
    }

    /// Position of the field's least significant bit.
    pub fn shift(&self) -> u8 {
        self.start + 1 - self.length
    }

    /// `((1 << length) - 1) << (start - length + 1)`
    pub fn mask(&self) -> u8 {
        ((((1u16 << self.length) - 1) << self.shift()) & 0xFF) as u8
    }
}

fn check_bit(n: u8) -> Result<(), HalError> {
    if n > MAX_BIT_INDEX {
        return Err(HalError::InvalidArgument(format!(
            "bit number {n} out of range 0..=7"
        )));
    }
    Ok(())
}

/// Test bit `n` of `byte`.
pub fn is_bit_set(byte: u8, n: u8) -> Result<bool, HalError> {
    check_bit(n)?;
    Ok(byte & (1 << n) != 0)
}

/// Return `byte` with bit `n` set or cleared.
pub fn set_bit(byte: u8, n: u8, value: bool) -> Result<u8, HalError> {
    check_bit(n)?;
    Ok(if value {
        byte | (1 << n)
    } else {
        byte & !(1 << n)
    })
}

/// Right-aligned value of `field` within `byte`.
#[inline]
pub fn extract_bits(byte: u8, field: BitField) -> u8 {
    (byte & field.mask()) >> field.shift()
}

/// Replace `field` within `byte` by the low bits of `value`.
///
/// Bits of `value` that do not fit in the field are discarded.
#[inline]
pub fn merge_bits(byte: u8, field: BitField, value: u8) -> u8 {
    let mask = field.mask();
    let shifted = ((u16::from(value) << field.shift()) & 0xFF) as u8 & mask;
    (byte & !mask) | shifted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasheet_example() {
        let field = BitField::new(4, 3).unwrap();
        assert_eq!(field.mask(), 0b0001_1100);
        assert_eq!(field.shift(), 2);
        assert_eq!(merge_bits(0b1010_1111, field, 0b010), 0b1010_1011);
    }

    #[test]
    fn test_full_byte_field() {
        let field = BitField::new(7, 8).unwrap();
        assert_eq!(field.mask(), 0xFF);
        assert_eq!(extract_bits(0xA5, field), 0xA5);
        assert_eq!(merge_bits(0x00, field, 0x5A), 0x5A);
    }

    #[test]
    fn test_top_bits_are_unsigned() {
        let field = BitField::new(7, 2).unwrap();
        assert_eq!(extract_bits(0xC0, field), 0b11);
    }

    #[test]
    fn test_value_overflow_is_masked() {
        let field = BitField::new(1, 2).unwrap();
        assert_eq!(merge_bits(0b1111_0000, field, 0xFF), 0b1111_0011);
    }

    #[test]
    fn test_invalid_fields() {
        assert!(BitField::new(8, 1).is_err());
        assert!(BitField::new(3, 0).is_err());
        assert!(BitField::new(2, 4).is_err());
        assert!(BitField::new(0, 1).is_ok());
    }

    #[test]
    fn test_single_bits() {
        assert!(is_bit_set(0b0000_1000, 3).unwrap());
        assert!(!is_bit_set(0b0000_1000, 2).unwrap());
        assert_eq!(set_bit(0x00, 7, true).unwrap(), 0x80);
        assert_eq!(set_bit(0xFF, 0, false).unwrap(), 0xFE);
        assert!(is_bit_set(0, 8).is_err());
    }
}
