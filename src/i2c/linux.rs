//! i2c-dev transport for Linux
//!
//! Talks to `/dev/i2c-N` through [`i2cdev::linux::LinuxI2CDevice`], which
//! selects the slave with the `I2C_SLAVE` ioctl when the node is opened and
//! then exposes plain `read(2)`/`write(2)`. A register read is two
//! transactions (sub-address write, then data read); devices that need a
//! repeated start should use a transport built on `I2C_RDWR` instead.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use i2cdev::linux::LinuxI2CDevice;

use crate::config::HalConfig;
use crate::error::HalError;
use crate::i2c::{RegisterAddress, RegisterTransport};

/// Transport over a Linux i2c-dev character device.
pub struct LinuxI2cTransport {
    path: PathBuf,
    device: u16,
    dev: Option<LinuxI2CDevice>,
}

impl std::fmt::Debug for LinuxI2cTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxI2cTransport")
            .field("path", &self.path)
            .field("device", &format_args!("0x{:02X}", self.device))
            .field("open", &self.dev.is_some())
            .finish()
    }
}

impl LinuxI2cTransport {
    /// Transport for `device` on the bus node at `path`. Nothing is opened yet.
    pub fn new(path: impl AsRef<Path>, device: u16) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            device,
            dev: None,
        }
    }

    /// Transport for `device` on controller `controller`, using the configured node prefix.
    pub fn for_controller(config: &HalConfig, controller: u8, device: u16) -> Self {
        Self::new(config.i2c_device_path(controller), device)
    }

    /// Device node this transport opens.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dev(&mut self, address: &RegisterAddress) -> Result<&mut LinuxI2CDevice, HalError> {
        let path = &self.path;
        self.dev
            .as_mut()
            .ok_or_else(|| HalError::Transport(format!("{address}: {} is not open", path.display())))
    }
}

impl RegisterTransport for LinuxI2cTransport {
    fn open(&mut self) -> Result<(), HalError> {
        if self.dev.is_some() {
            return Ok(());
        }
        let dev = LinuxI2CDevice::new(&self.path, self.device).map_err(|e| {
            HalError::transport(
                &format!("open {} for slave 0x{:02X}", self.path.display(), self.device),
                e,
            )
        })?;

        log::debug!("Opened {} for slave 0x{:02X}", self.path.display(), self.device);
        self.dev = Some(dev);
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        if self.dev.take().is_some() {
            log::debug!("Closed {}", self.path.display());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.dev.is_some()
    }

    fn write(&mut self, address: &RegisterAddress, data: &[u8]) -> Result<(), HalError> {
        let mut frame = Vec::with_capacity(address.prefix().len() + data.len());
        frame.extend_from_slice(address.prefix());
        frame.extend_from_slice(data);

        let dev = self.dev(address)?;
        let n = Write::write(dev, &frame).map_err(|e| HalError::transport(&format!("write {address}"), e))?;
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
        let dev = self.dev(address)?;
        dev.write_all(&prefix)
            .map_err(|e| HalError::transport(&format!("select {address}"), e))?;
        Read::read(dev, buf).map_err(|e| HalError::transport(&format!("read {address}"), e))
    }
}
