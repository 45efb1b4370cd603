//! # Addressed Register Channel
//!
//! Register-oriented I/O over a byte-oriented bus. A transaction is a
//! sub-address prefix (the register number, 1 or 2 bytes, MSB first)
//! followed by payload bytes on write, or by a read of exactly `n` bytes.
//!
//! The bus itself is reached through the [`RegisterTransport`] capability
//! trait; the channel composes a transport and adds byte-order handling and
//! bit-field access on top of it. Drivers compose a channel rather than
//! extending it.
//!
//! ## Transports
//!
//! - [`LinuxI2cTransport`] - `/dev/i2c-N` character devices
//! - `RppalI2cTransport` - Raspberry Pi via rppal (feature `raspberry-pi`)
//! - [`MockTransport`] - in-memory register file for tests
//!
//! ## Usage
//!
//! ```rust
//! use sbc_hal::i2c::{MockTransport, RegisterChannel, SubAddressWidth};
//! use sbc_hal::util::{BitField, ByteOrder};
//!
//! let mock = MockTransport::new();
//! mock.set_registers(0x10, &[0x12, 0x34]);
//!
//! let mut channel = RegisterChannel::open(mock, 1, 0x29).unwrap();
//! let value = channel
//!     .read_uint(0x10, SubAddressWidth::One, 2, ByteOrder::BigEndian)
//!     .unwrap();
//! assert_eq!(value, 0x1234);
//!
//! channel.write_bits(0x10, BitField::new(4, 3).unwrap(), 0b101).unwrap();
//! ```

pub mod channel;
pub mod linux;
pub mod mock;
#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

use std::fmt;

use crate::constants::{SUB_ADDRESS_SIZE_1_BYTE, SUB_ADDRESS_SIZE_2_BYTES};
use crate::error::HalError;

pub use channel::RegisterChannel;
pub use linux::LinuxI2cTransport;
pub use mock::{MockTransport, Transaction};
#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::RppalI2cTransport;

/// Number of bytes used to encode the register number on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubAddressWidth {
    One,
    Two,
}

impl SubAddressWidth {
    pub fn bytes(self) -> usize {
        match self {
            SubAddressWidth::One => SUB_ADDRESS_SIZE_1_BYTE as usize,
            SubAddressWidth::Two => SUB_ADDRESS_SIZE_2_BYTES as usize,
        }
    }
}

impl TryFrom<u8> for SubAddressWidth {
    type Error = HalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            SUB_ADDRESS_SIZE_1_BYTE => Ok(SubAddressWidth::One),
            SUB_ADDRESS_SIZE_2_BYTES => Ok(SubAddressWidth::Two),
            other => Err(HalError::InvalidArgument(format!(
                "sub-address width must be 1 or 2 bytes, got {other}"
            ))),
        }
    }
}

/// Fully qualified register location for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAddress {
    /// Bus controller number (`N` in `/dev/i2c-N`).
    pub controller: u8,
    /// Device (slave) address on the bus.
    pub device: u16,
    /// Width of the register number on the wire.
    pub width: SubAddressWidth,
    /// Register number.
    pub register: u16,
    prefix: [u8; 2],
}

impl RegisterAddress {
    /// Build an address, rejecting register numbers that do not fit `width`.
    pub fn new(
        controller: u8,
        device: u16,
        width: SubAddressWidth,
        register: u16,
    ) -> Result<Self, HalError> {
        let prefix = match width {
            SubAddressWidth::One => {
                let reg = u8::try_from(register).map_err(|_| {
                    HalError::InvalidArgument(format!(
                        "register 0x{register:04X} does not fit a 1-byte sub-address"
                    ))
                })?;
                [reg, 0]
            }
            SubAddressWidth::Two => register.to_be_bytes(),
        };
        Ok(Self {
            controller,
            device,
            width,
            register,
            prefix,
        })
    }

    /// The sub-address bytes sent ahead of every transfer.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix[..self.width.bytes()]
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "i2c-{}@0x{:02X} reg 0x{:0width$X}",
            self.controller,
            self.device,
            self.register,
            width = self.width.bytes() * 2
        )
    }
}

/// Native transport capability: what the channel needs from a bus backend.
///
/// Implementations perform the actual syscalls. They must report a read
/// that returned fewer bytes than requested through the returned count
/// rather than padding the buffer.
pub trait RegisterTransport: Send {
    /// Acquire the OS resource (open the device node, select the slave).
    fn open(&mut self) -> Result<(), HalError>;

    /// Release the OS resource. Closing a closed transport is a no-op.
    fn close(&mut self) -> Result<(), HalError>;

    fn is_open(&self) -> bool;

    /// Send `address.prefix()` followed by `data` as one transaction.
    fn write(&mut self, address: &RegisterAddress, data: &[u8]) -> Result<(), HalError>;

    /// Send `address.prefix()` then read into `buf`; returns bytes read.
    fn read(&mut self, address: &RegisterAddress, buf: &mut [u8]) -> Result<usize, HalError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn open(&mut self) -> Result<(), HalError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), HalError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, address: &RegisterAddress, data: &[u8]) -> Result<(), HalError> {
        (**self).write(address, data)
    }

    fn read(&mut self, address: &RegisterAddress, buf: &mut [u8]) -> Result<usize, HalError> {
        (**self).read(address, buf)
    }
}
