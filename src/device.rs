//! # Device Lifecycle
//!
//! [`DeviceHandle`] owns one OS-backed resource (an open register channel,
//! an exported GPIO pin) and optionally one edge-event subscription, and
//! ties both to an explicit, idempotent `close`. Closing cancels the
//! subscription before the resource is released, so no new event is
//! dispatched to the listener afterwards. A listener call the bridge thread
//! had already started may still finish after `close` returns; listeners
//! must not assume the device is open. After close every operation fails
//! with [`HalError::ResourceClosed`] without touching the hardware.
//!
//! ```rust
//! use sbc_hal::device::I2cDevice;
//! use sbc_hal::i2c::MockTransport;
//!
//! let mock = MockTransport::new();
//! let mut device = I2cDevice::open(mock.clone(), 1, 0x29).unwrap();
//! device.write_byte(0x00, 0x01).unwrap();
//!
//! device.close().unwrap();
//! device.close().unwrap();
//! assert!(!device.is_open());
//! assert!(device.read_byte(0x00).unwrap_err().is_closed());
//! ```

use std::path::Path;

use crate::config::HalConfig;
use crate::error::HalError;
use crate::gpio::{EdgeEventBridge, EdgeListener, SourceKey, Subscription};
use crate::i2c::{LinuxI2cTransport, RegisterChannel, RegisterTransport, SubAddressWidth};
use crate::util::bits::BitField;
use crate::util::bytes::ByteOrder;

/// An OS resource a [`DeviceHandle`] can own.
pub trait Resource {
    /// Short human readable identity used in logs and errors.
    fn describe(&self) -> String;

    /// Release the OS resource. Called at most once by the handle.
    fn release(&mut self) -> Result<(), HalError>;
}

/// Exclusive owner of a resource and its edge-event subscription.
pub struct DeviceHandle<R: Resource> {
    name: String,
    resource: Option<R>,
    subscription: Option<Subscription>,
}

impl<R: Resource> std::fmt::Debug for DeviceHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}

impl<R: Resource> DeviceHandle<R> {
    /// Wrap an already opened resource.
    pub fn new(resource: R) -> Self {
        let name = resource.describe();
        log::debug!("Device {name} opened");
        Self {
            name,
            resource: Some(resource),
            subscription: None,
        }
    }

    /// Identity used in logs and `ResourceClosed` errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn closed_error(&self) -> HalError {
        HalError::ResourceClosed(format!("device {} is closed", self.name))
    }

    /// The owned resource, or `ResourceClosed` after close.
    pub fn resource(&self) -> Result<&R, HalError> {
        self.resource.as_ref().ok_or_else(|| self.closed_error())
    }

    pub fn resource_mut(&mut self) -> Result<&mut R, HalError> {
        match self.resource.as_mut() {
            Some(resource) => Ok(resource),
            None => Err(HalError::ResourceClosed(format!("device {} is closed", self.name))),
        }
    }

    /// Register `listener` for `key` on `bridge`, replacing any current subscription.
    pub fn subscribe<L>(
        &mut self,
        bridge: &EdgeEventBridge,
        key: SourceKey,
        path: impl AsRef<Path>,
        listener: L,
    ) -> Result<(), HalError>
    where
        L: EdgeListener + 'static,
    {
        self.resource()?;
        self.unsubscribe()?;
        self.subscription = Some(bridge.subscribe(key, path, listener)?);
        Ok(())
    }

    /// Cancel the current subscription, if any.
    pub fn unsubscribe(&mut self) -> Result<(), HalError> {
        match self.subscription.take() {
            Some(mut subscription) => subscription.cancel(),
            None => Ok(()),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// True until [`close`](Self::close); has no side effects.
    pub fn is_open(&self) -> bool {
        self.resource.is_some()
    }

    /// Cancel the subscription, then release the resource. Repeated calls are no-ops.
    ///
    /// Both steps always run; the first error is returned.
    pub fn close(&mut self) -> Result<(), HalError> {
        let cancelled = self.unsubscribe();
        let released = match self.resource.take() {
            Some(mut resource) => {
                log::debug!("Closing device {}", self.name);
                resource.release()
            }
            None => Ok(()),
        };
        cancelled.and(released)
    }
}

impl<R: Resource> Drop for DeviceHandle<R> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                log::warn!("Error closing device {} on drop: {e}", self.name);
            }
        }
    }
}

/// Register device on an I2C bus with lifecycle checks on every operation.
pub type I2cDevice<T> = DeviceHandle<RegisterChannel<T>>;

impl I2cDevice<LinuxI2cTransport> {
    /// Open `device` on `/dev/i2c-<controller>` (prefix from `config`).
    pub fn open_linux(config: &HalConfig, controller: u8, device: u16) -> Result<Self, HalError> {
        let transport = LinuxI2cTransport::for_controller(config, controller, device);
        Self::open(transport, controller, device)
    }
}

impl<T: RegisterTransport> I2cDevice<T> {
    /// Open `transport` and bind it to `device` on bus `controller`.
    pub fn open(transport: T, controller: u8, device: u16) -> Result<Self, HalError> {
        Ok(DeviceHandle::new(RegisterChannel::open(transport, controller, device)?))
    }

    /// Bus number; fails once closed.
    pub fn controller(&self) -> Result<u8, HalError> {
        Ok(self.resource()?.controller())
    }

    /// Slave address; fails once closed.
    pub fn device(&self) -> Result<u16, HalError> {
        Ok(self.resource()?.device())
    }

    /// See [`RegisterChannel::write`].
    pub fn write(&mut self, register: u16, width: SubAddressWidth, data: &[u8]) -> Result<(), HalError> {
        self.resource_mut()?.write(register, width, data)
    }

    /// See [`RegisterChannel::read`].
    pub fn read(&mut self, register: u16, width: SubAddressWidth, length: usize) -> Result<Vec<u8>, HalError> {
        self.resource_mut()?.read(register, width, length)
    }

    /// See [`RegisterChannel::read_into`].
    pub fn read_into(&mut self, register: u16, width: SubAddressWidth, buf: &mut [u8]) -> Result<(), HalError> {
        self.resource_mut()?.read_into(register, width, buf)
    }

    /// See [`RegisterChannel::read_uint`].
    pub fn read_uint(
        &mut self,
        register: u16,
        width: SubAddressWidth,
        length: usize,
        order: ByteOrder,
    ) -> Result<u32, HalError> {
        self.resource_mut()?.read_uint(register, width, length, order)
    }

    /// See [`RegisterChannel::read_uint_default`].
    pub fn read_uint_default(&mut self, register: u16, width: SubAddressWidth, length: usize) -> Result<u32, HalError> {
        self.resource_mut()?.read_uint_default(register, width, length)
    }

    /// See [`RegisterChannel::read_short`].
    pub fn read_short(&mut self, register: u16, width: SubAddressWidth, order: ByteOrder) -> Result<i16, HalError> {
        self.resource_mut()?.read_short(register, width, order)
    }

    /// See [`RegisterChannel::read_ushort`].
    pub fn read_ushort(&mut self, register: u16, width: SubAddressWidth, order: ByteOrder) -> Result<u16, HalError> {
        self.resource_mut()?.read_ushort(register, width, order)
    }

    /// See [`RegisterChannel::read_ushort_default`].
    pub fn read_ushort_default(&mut self, register: u16, width: SubAddressWidth) -> Result<u16, HalError> {
        self.resource_mut()?.read_ushort_default(register, width)
    }

    /// See [`RegisterChannel::read_byte`].
    pub fn read_byte(&mut self, register: u16) -> Result<u8, HalError> {
        self.resource_mut()?.read_byte(register)
    }

    /// See [`RegisterChannel::read_byte_with_width`].
    pub fn read_byte_with_width(&mut self, register: u16, width: SubAddressWidth) -> Result<u8, HalError> {
        self.resource_mut()?.read_byte_with_width(register, width)
    }

    /// See [`RegisterChannel::read_bytes`].
    pub fn read_bytes(&mut self, register: u16, length: usize) -> Result<Vec<u8>, HalError> {
        self.resource_mut()?.read_bytes(register, length)
    }

    /// See [`RegisterChannel::write_byte`].
    pub fn write_byte(&mut self, register: u16, value: u8) -> Result<(), HalError> {
        self.resource_mut()?.write_byte(register, value)
    }

    /// See [`RegisterChannel::write_bytes`].
    pub fn write_bytes(&mut self, register: u16, data: &[u8]) -> Result<(), HalError> {
        self.resource_mut()?.write_bytes(register, data)
    }

    /// See [`RegisterChannel::write_short`].
    pub fn write_short(&mut self, register: u16, value: i16) -> Result<(), HalError> {
        self.resource_mut()?.write_short(register, value)
    }

    /// See [`RegisterChannel::write_word`].
    pub fn write_word(&mut self, register: u16, value: u16) -> Result<(), HalError> {
        self.resource_mut()?.write_word(register, value)
    }

    /// See [`RegisterChannel::read_bit`].
    pub fn read_bit(&mut self, register: u16, bit: u8) -> Result<bool, HalError> {
        self.resource_mut()?.read_bit(register, bit)
    }

    /// See [`RegisterChannel::write_bit`]; not atomic.
    pub fn write_bit(&mut self, register: u16, bit: u8, value: bool) -> Result<(), HalError> {
        self.resource_mut()?.write_bit(register, bit, value)
    }

    /// See [`RegisterChannel::read_bits`].
    pub fn read_bits(&mut self, register: u16, field: BitField) -> Result<u8, HalError> {
        self.resource_mut()?.read_bits(register, field)
    }

    /// See [`RegisterChannel::write_bits`]; a zero register is left untouched.
    pub fn write_bits(&mut self, register: u16, field: BitField, value: u8) -> Result<(), HalError> {
        self.resource_mut()?.write_bits(register, field, value)
    }
}
