//! Register channel: the addressed read/write protocol over a transport.
//!
//! Bit and bit-field helpers are read-modify-write sequences of two separate
//! bus transactions. Two callers doing read-modify-write on the same register
//! can interleave and lose an update; the channel does not lock across
//! operations.

use crate::config::default_byte_order;
use crate::constants::{MAX_BIT_INDEX, MAX_UINT_BYTES};
use crate::device::Resource;
use crate::error::HalError;
use crate::i2c::{RegisterAddress, RegisterTransport, SubAddressWidth};
use crate::util::bits::{self, BitField};
use crate::util::bytes::{get_uint, ByteOrder};
use crate::util::logging::log_transfer_hex;

/// Addressed register channel for one device on one bus.
#[derive(Debug)]
pub struct RegisterChannel<T: RegisterTransport> {
    transport: T,
    controller: u8,
    device: u16,
}

impl<T: RegisterTransport> RegisterChannel<T> {
    /// Open `transport` (if it is not already open) and bind it to a device.
    pub fn open(mut transport: T, controller: u8, device: u16) -> Result<Self, HalError> {
        if !transport.is_open() {
            transport.open()?;
        }
        log::debug!("Register channel opened: i2c-{controller}@0x{device:02X}");
        Ok(Self {
            transport,
            controller,
            device,
        })
    }

    /// Bus number the channel was opened on.
    pub fn controller(&self) -> u8 {
        self.controller
    }

    /// Slave address of the device.
    pub fn device(&self) -> u16 {
        self.device
    }

    /// The underlying transport, e.g. a mock for inspection.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    fn address(&self, register: u16, width: SubAddressWidth) -> Result<RegisterAddress, HalError> {
        RegisterAddress::new(self.controller, self.device, width, register)
    }

    /// Write `data` to `register` in a single transaction.
    pub fn write(&mut self, register: u16, width: SubAddressWidth, data: &[u8]) -> Result<(), HalError> {
        let address = self.address(register, width)?;
        log_transfer_hex("write", register, data);
        self.transport.write(&address, data)
    }

    /// Read exactly `buf.len()` bytes starting at `register`.
    pub fn read_into(&mut self, register: u16, width: SubAddressWidth, buf: &mut [u8]) -> Result<(), HalError> {
        let address = self.address(register, width)?;
        let n = self.transport.read(&address, buf)?;
        if n != buf.len() {
            return Err(HalError::Transport(format!(
                "short read from {address}: got {n} of {} bytes",
                buf.len()
            )));
        }
        log_transfer_hex("read", register, buf);
        Ok(())
    }

    /// Read exactly `length` bytes starting at `register`.
    pub fn read(&mut self, register: u16, width: SubAddressWidth, length: usize) -> Result<Vec<u8>, HalError> {
        let mut buf = vec![0u8; length];
        self.read_into(register, width, &mut buf)?;
        Ok(buf)
    }

    /// Read `length` (1..=4) bytes and compose them as an unsigned integer.
    pub fn read_uint(
        &mut self,
        register: u16,
        width: SubAddressWidth,
        length: usize,
        order: ByteOrder,
    ) -> Result<u32, HalError> {
        if length == 0 || length > MAX_UINT_BYTES {
            return Err(HalError::InvalidArgument(format!(
                "can't create an int for {length} bytes, max length is {MAX_UINT_BYTES}"
            )));
        }
        let mut buf = [0u8; MAX_UINT_BYTES];
        self.read_into(register, width, &mut buf[..length])?;
        get_uint(&buf[..length], order)
    }

    /// [`read_uint`](Self::read_uint) using the process-wide default byte order.
    pub fn read_uint_default(&mut self, register: u16, width: SubAddressWidth, length: usize) -> Result<u32, HalError> {
        self.read_uint(register, width, length, default_byte_order())
    }

    /// Read a signed 16-bit value in the given byte order.
    pub fn read_short(&mut self, register: u16, width: SubAddressWidth, order: ByteOrder) -> Result<i16, HalError> {
        let mut buf = [0u8; 2];
        self.read_into(register, width, &mut buf)?;
        Ok(match order {
            ByteOrder::BigEndian => i16::from_be_bytes(buf),
            ByteOrder::LittleEndian => i16::from_le_bytes(buf),
        })
    }

    /// Read an unsigned 16-bit value in the given byte order.
    pub fn read_ushort(&mut self, register: u16, width: SubAddressWidth, order: ByteOrder) -> Result<u16, HalError> {
        self.read_short(register, width, order).map(|v| v as u16)
    }

    /// [`read_ushort`](Self::read_ushort) using the process-wide default byte order.
    pub fn read_ushort_default(&mut self, register: u16, width: SubAddressWidth) -> Result<u16, HalError> {
        self.read_ushort(register, width, default_byte_order())
    }

    /// Read one byte from an 8-bit register.
    pub fn read_byte(&mut self, register: u16) -> Result<u8, HalError> {
        self.read_byte_with_width(register, SubAddressWidth::One)
    }

    /// Read one byte from a register addressed with `width`.
    pub fn read_byte_with_width(&mut self, register: u16, width: SubAddressWidth) -> Result<u8, HalError> {
        let mut buf = [0u8; 1];
        self.read_into(register, width, &mut buf)?;
        Ok(buf[0])
    }

    /// Read `length` consecutive bytes from an 8-bit register address.
    pub fn read_bytes(&mut self, register: u16, length: usize) -> Result<Vec<u8>, HalError> {
        self.read(register, SubAddressWidth::One, length)
    }

    /// Write one byte to an 8-bit register.
    pub fn write_byte(&mut self, register: u16, value: u8) -> Result<(), HalError> {
        self.write(register, SubAddressWidth::One, &[value])
    }

    /// Write `data` starting at an 8-bit register address.
    pub fn write_bytes(&mut self, register: u16, data: &[u8]) -> Result<(), HalError> {
        self.write(register, SubAddressWidth::One, data)
    }

    /// Write a signed 16-bit value, MSB first, behind a 1-byte sub-address.
    pub fn write_short(&mut self, register: u16, value: i16) -> Result<(), HalError> {
        self.write(register, SubAddressWidth::One, &value.to_be_bytes())
    }

    /// Write a 16-bit word, MSB first, behind a 2-byte sub-address.
    pub fn write_word(&mut self, register: u16, value: u16) -> Result<(), HalError> {
        self.write(register, SubAddressWidth::Two, &value.to_be_bytes())
    }

    /// Read bit `bit` (0-7) of an 8-bit register.
    pub fn read_bit(&mut self, register: u16, bit: u8) -> Result<bool, HalError> {
        if bit > MAX_BIT_INDEX {
            return Err(HalError::InvalidArgument(format!("bit number {bit} out of range 0..=7")));
        }
        let byte = self.read_byte(register)?;
        bits::is_bit_set(byte, bit)
    }

    /// Set or clear bit `bit` (0-7) with a read-modify-write.
    pub fn write_bit(&mut self, register: u16, bit: u8, value: bool) -> Result<(), HalError> {
        if bit > MAX_BIT_INDEX {
            return Err(HalError::InvalidArgument(format!("bit number {bit} out of range 0..=7")));
        }
        let byte = self.read_byte(register)?;
        let updated = bits::set_bit(byte, bit, value)?;
        self.write_byte(register, updated)
    }

    /// Right-aligned value of `field` in an 8-bit register.
    pub fn read_bits(&mut self, register: u16, field: BitField) -> Result<u8, HalError> {
        let byte = self.read_byte(register)?;
        Ok(bits::extract_bits(byte, field))
    }

    /// Merge `value` into `field` with a read-modify-write.
    ///
    /// Nothing is written when the register currently reads as zero.
    /// Existing drivers rely on this, so it is kept as is.
    pub fn write_bits(&mut self, register: u16, field: BitField, value: u8) -> Result<(), HalError> {
        let byte = self.read_byte(register)?;
        if byte == 0 {
            log::trace!("write_bits on zero register 0x{register:02X} skipped");
            return Ok(());
        }
        self.write_byte(register, bits::merge_bits(byte, field, value))
    }
}

impl<T: RegisterTransport> Resource for RegisterChannel<T> {
    fn describe(&self) -> String {
        format!("i2c-{}@0x{:02X}", self.controller, self.device)
    }

    fn release(&mut self) -> Result<(), HalError> {
        log::debug!("Releasing register channel {}", self.describe());
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::{MockTransport, Transaction};

    fn channel() -> (MockTransport, RegisterChannel<MockTransport>) {
        let mock = MockTransport::new();
        let channel = RegisterChannel::open(mock.clone(), 1, 0x40).unwrap();
        (mock, channel)
    }

    #[test]
    fn test_open_opens_transport() {
        let (mock, channel) = channel();
        assert!(mock.is_open());
        assert!(channel.is_open());
        assert_eq!(mock.transactions(), vec![Transaction::Open]);
    }

    #[test]
    fn test_write_then_read() {
        let (mock, mut channel) = channel();
        channel.write(0x20, SubAddressWidth::One, &[1, 2, 3]).unwrap();
        assert_eq!(mock.register(0x21), 2);
        assert_eq!(channel.read(0x20, SubAddressWidth::One, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_short_read_is_error() {
        let (mock, mut channel) = channel();
        mock.short_read_next(1);
        let result = channel.read(0x00, SubAddressWidth::One, 2);
        assert!(matches!(result, Err(HalError::Transport(_))));
    }

    #[test]
    fn test_read_uint_rejects_before_io() {
        let (mock, mut channel) = channel();
        let before = mock.io_count();
        let result = channel.read_uint(0x00, SubAddressWidth::One, 5, ByteOrder::BigEndian);
        assert!(matches!(result, Err(HalError::InvalidArgument(_))));
        assert_eq!(mock.io_count(), before);
    }

    #[test]
    fn test_read_short_orders() {
        let (mock, mut channel) = channel();
        mock.set_registers(0x0100, &[0xFF, 0x38]);
        assert_eq!(
            channel.read_short(0x0100, SubAddressWidth::Two, ByteOrder::BigEndian).unwrap(),
            -200
        );
        assert_eq!(
            channel.read_ushort(0x0100, SubAddressWidth::Two, ByteOrder::LittleEndian).unwrap(),
            0x38FF
        );
    }

    #[test]
    fn test_write_word_uses_two_byte_sub_address() {
        let (mock, mut channel) = channel();
        channel.write_word(0x0012, 0xBEEF).unwrap();
        assert_eq!(
            mock.transactions().last().cloned(),
            Some(Transaction::Write {
                width: SubAddressWidth::Two,
                register: 0x0012,
                data: vec![0xBE, 0xEF],
            })
        );
    }

    #[test]
    fn test_bits_round_trip() {
        let (mock, mut channel) = channel();
        mock.set_register(0x07, 0b1010_1111);
        let field = BitField::new(4, 3).unwrap();

        channel.write_bits(0x07, field, 0b010).unwrap();
        assert_eq!(mock.register(0x07), 0b1010_1011);
        assert_eq!(channel.read_bits(0x07, field).unwrap(), 0b010);
    }

    #[test]
    fn test_write_bits_skips_zero_register() {
        let (mock, mut channel) = channel();
        let field = BitField::new(4, 3).unwrap();
        channel.write_bits(0x07, field, 0b010).unwrap();
        assert_eq!(mock.register(0x07), 0x00);
        assert!(!mock
            .transactions()
            .iter()
            .any(|t| matches!(t, Transaction::Write { .. })));
    }

    #[test]
    fn test_write_bit_read_modify_write() {
        let (mock, mut channel) = channel();
        mock.set_register(0x3A, 0b0000_0001);
        channel.write_bit(0x3A, 7, true).unwrap();
        channel.write_bit(0x3A, 0, false).unwrap();
        assert_eq!(mock.register(0x3A), 0b1000_0000);
        assert!(channel.read_bit(0x3A, 7).unwrap());
        assert!(channel.read_bit(0x3A, 8).is_err());
    }

    #[test]
    fn test_transport_failure_propagates() {
        let (mock, mut channel) = channel();
        mock.fail_next("NACK");
        let result = channel.write_byte(0x01, 0xAA);
        assert!(matches!(result, Err(HalError::Transport(msg)) if msg.contains("NACK")));
    }
}
