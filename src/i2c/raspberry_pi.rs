//! Raspberry Pi transport using the rppal crate
//!
//! Uses the rppal I2C peripheral driver instead of raw i2c-dev calls. Reads
//! go through `write_read`, so the sub-address and data phases share a
//! repeated start, which some sensors require.
//!
//! ```rust,no_run
//! use sbc_hal::i2c::{RegisterChannel, RppalI2cTransport};
//!
//! let transport = RppalI2cTransport::new(1, 0x29);
//! let mut channel = RegisterChannel::open(transport, 1, 0x29)?;
//! let id = channel.read_byte(0xC0)?;
//! # Ok::<(), sbc_hal::HalError>(())
//! ```

use rppal::i2c::I2c;

use crate::error::HalError;
use crate::i2c::{RegisterAddress, RegisterTransport};

/// I2C transport for Raspberry Pi boards.
pub struct RppalI2cTransport {
    bus: u8,
    device: u16,
    i2c: Option<I2c>,
}

impl std::fmt::Debug for RppalI2cTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RppalI2cTransport")
            .field("bus", &self.bus)
            .field("device", &self.device)
            .field("open", &self.i2c.is_some())
            .finish()
    }
}

impl RppalI2cTransport {
    pub fn new(bus: u8, device: u16) -> Self {
        Self {
            bus,
            device,
            i2c: None,
        }
    }

    fn i2c(&mut self, address: &RegisterAddress) -> Result<&mut I2c, HalError> {
        self.i2c
            .as_mut()
            .ok_or_else(|| HalError::Transport(format!("{address}: rppal bus not open")))
    }
}

impl RegisterTransport for RppalI2cTransport {
    fn open(&mut self) -> Result<(), HalError> {
        if self.i2c.is_some() {
            return Ok(());
        }
        let mut i2c = I2c::with_bus(self.bus).map_err(|e| HalError::transport(&format!("open bus {}", self.bus), e))?;
        i2c.set_slave_address(self.device)
            .map_err(|e| HalError::transport(&format!("select slave 0x{:02X}", self.device), e))?;
        log::info!("rppal I2C bus {} opened for slave 0x{:02X}", self.bus, self.device);
        self.i2c = Some(i2c);
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        self.i2c = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.i2c.is_some()
    }

    fn write(&mut self, address: &RegisterAddress, data: &[u8]) -> Result<(), HalError> {
        let mut frame = Vec::with_capacity(address.prefix().len() + data.len());
        frame.extend_from_slice(address.prefix());
        frame.extend_from_slice(data);

        let i2c = self.i2c(address)?;
        let n = i2c
            .write(&frame)
            .map_err(|e| HalError::transport(&format!("write {address}"), e))?;
        if n != frame.len() {
            return Err(HalError::Transport(format!(
                "write {address}: wrote {n} of {} bytes",
                frame.len()
            )));
        }
        Ok(())
    }

    fn read(&mut self, address: &RegisterAddress, buf: &mut [u8]) -> Result<usize, HalError> {
        let prefix = address.prefix().to_vec();
        let i2c = self.i2c(address)?;
        i2c.write_read(&prefix, buf)
            .map_err(|e| HalError::transport(&format!("read {address}"), e))?;
        Ok(buf.len())
    }
}
