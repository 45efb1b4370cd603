//! # sbc-hal - Register I/O and GPIO Edge Events for Single-Board Computers
//!
//! The sbc-hal crate is the core of a hardware-abstraction layer for Linux
//! single-board computers. It provides the two pieces every sensor or
//! actuator driver is built on:
//!
//! - an addressed register channel over I2C (sub-address sizing, byte-order
//!   aware multi-byte reads, datasheet-style bit-field access)
//! - a GPIO edge-event bridge that turns kernel edge notifications on sysfs
//!   value files into timestamped events delivered to listeners from a
//!   background polling thread
//!
//! Both are wrapped in a device lifecycle with explicit, idempotent close.
//!
//! ## Features
//!
//! - `/dev/i2c-N` transport, an rppal transport (feature `raspberry-pi`) and an
//!   in-memory mock for driver tests
//! - epoll based polling provider with a process-wide shared bridge
//! - tokio channel adapter for consuming edge events from async code
//! - JSON configuration and `log` based diagnostics
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! sbc-hal = "0.3"
//! ```
//!
//! ```rust,no_run
//! use sbc_hal::{init_logger, open_i2c, HalConfig, SubAddressWidth};
//! use sbc_hal::util::{BitField, ByteOrder};
//!
//! # fn main() -> Result<(), sbc_hal::HalError> {
//! init_logger();
//! let config = HalConfig::default();
//! let mut sensor = open_i2c(&config, 1, 0x29)?;
//! let range = sensor.read_uint(0x0062, SubAddressWidth::Two, 1, ByteOrder::BigEndian)?;
//! let mode = sensor.read_bits(0x18, BitField::new(2, 2)?)?;
//! sensor.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod logging;
pub mod util;

pub use crate::config::HalConfig;
pub use crate::device::{DeviceHandle, I2cDevice, Resource};
pub use crate::error::HalError;
pub use crate::logging::{init_logger, log_info};

pub use gpio::{
    channel_listener, Direction, Edge, EdgeEvent, EdgeEventBridge, EdgeListener, GpioInput,
    GpioInputOutput, GpioOutput, PollingProvider, SourceKey, Subscription,
};
#[cfg(target_os = "linux")]
pub use gpio::{shared_bridge, EpollProvider};
pub use i2c::{LinuxI2cTransport, RegisterChannel, RegisterTransport, SubAddressWidth};

/// Open an I2C device on `/dev/i2c-<controller>`.
///
/// # Arguments
/// * `config` - HAL configuration (supplies the device node prefix)
/// * `controller` - I2C bus number
/// * `device` - Slave address on that bus
///
/// # Returns
/// * `Ok(I2cDevice)` - Open device handle
/// * `Err(HalError)` - The node could not be opened or the slave selected
pub fn open_i2c(
    config: &HalConfig,
    controller: u8,
    device: u16,
) -> Result<I2cDevice<LinuxI2cTransport>, HalError> {
    I2cDevice::open_linux(config, controller, device)
}

/// Open a sysfs GPIO as an input with the given edge selection.
///
/// # Arguments
/// * `config` - HAL configuration (supplies the sysfs root)
/// * `gpio` - Kernel GPIO number
/// * `edge` - Edges that raise events
///
/// # Returns
/// * `Ok(GpioInput)` - Exported and configured input
/// * `Err(HalError)` - Export or configuration failed
pub fn open_gpio_input(config: &HalConfig, gpio: u32, edge: Edge) -> Result<GpioInput, HalError> {
    GpioInput::open(config, gpio, edge)
}

/// Open a sysfs GPIO as an output driven to `initial`.
pub fn open_gpio_output(config: &HalConfig, gpio: u32, initial: bool) -> Result<GpioOutput, HalError> {
    GpioOutput::open(config, gpio, initial)
}

/// Open a sysfs GPIO whose direction can be switched after opening.
///
/// # Arguments
/// * `config` - HAL configuration (supplies the sysfs root)
/// * `gpio` - Kernel GPIO number
/// * `direction` - Initial direction
///
/// # Returns
/// * `Ok(GpioInputOutput)` - Exported and configured pin
/// * `Err(HalError)` - Export or configuration failed
pub fn open_gpio_input_output(
    config: &HalConfig,
    gpio: u32,
    direction: Direction,
) -> Result<GpioInputOutput, HalError> {
    GpioInputOutput::open(config, gpio, direction)
}
