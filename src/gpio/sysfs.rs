//! sysfs GPIO pins
//!
//! Legacy `/sys/class/gpio` interface: a pin is exported by writing its
//! number to `export`, configured through `gpioN/direction` and
//! `gpioN/edge`, and read or written through `gpioN/value`, which holds an
//! ASCII `'0'` or `'1'`. Edge notifications on the value file are what the
//! epoll provider watches.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::HalConfig;
use crate::constants::{GPIO_VALUE_FILE, HIGH_VALUE, LOW_VALUE};
use crate::device::{DeviceHandle, Resource};
use crate::error::HalError;
use crate::gpio::{EdgeEventBridge, EdgeListener, SourceKey};
use crate::util::wait::wait_until;

const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pin direction as written to `gpioN/direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    /// Output, initially low.
    Out,
    /// Output, initially high (glitch-free).
    OutHigh,
}

impl Direction {
    fn as_sysfs(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "low",
            Direction::OutHigh => "high",
        }
    }

    pub fn is_output(self) -> bool {
        !matches!(self, Direction::In)
    }
}

/// Edge selection as written to `gpioN/edge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    fn as_sysfs(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sysfs())
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), HalError> {
    std::fs::write(path, value).map_err(|e| {
        HalError::Io(std::io::Error::new(
            e.kind(),
            format!("writing {value:?} to {}: {e}", path.display()),
        ))
    })
}

/// One exported sysfs GPIO with its value file held open.
#[derive(Debug)]
pub struct SysFsPin {
    gpio: u32,
    root: PathBuf,
    direction: Direction,
    value: Option<File>,
    exported: bool,
}

impl SysFsPin {
    /// Export `gpio` if needed, set its direction and open its value file.
    pub fn open(config: &HalConfig, gpio: u32, direction: Direction) -> Result<Self, HalError> {
        let root = config.gpio_sysfs_root.clone();
        let dir = root.join(format!("gpio{gpio}"));

        let mut exported = false;
        if !dir.exists() {
            write_attr(&root.join("export"), &gpio.to_string())?;
            exported = true;
            let settle = Duration::from_millis(config.export_settle_ms);
            let value_path = dir.join(GPIO_VALUE_FILE);
            let outcome = wait_until(settle, EXPORT_POLL_INTERVAL, || Ok(value_path.exists()))?;
            if !outcome.is_ready() {
                if let Err(e) = write_attr(&root.join("unexport"), &gpio.to_string()) {
                    log::warn!("Failed to unexport gpio{gpio}: {e}");
                }
                return Err(HalError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("gpio{gpio} did not appear after export"),
                )));
            }
            log::debug!("Exported gpio{gpio}");
        }

        let mut pin = Self {
            gpio,
            root,
            direction,
            value: None,
            exported,
        };
        if let Err(e) = pin.configure(direction) {
            if let Err(release_error) = pin.release() {
                log::warn!("Failed to release gpio{gpio}: {release_error}");
            }
            return Err(e);
        }
        Ok(pin)
    }

    /// Write `direction` and reopen the value file with the matching access mode.
    fn configure(&mut self, direction: Direction) -> Result<(), HalError> {
        write_attr(&self.directory().join("direction"), direction.as_sysfs())?;
        let file = OpenOptions::new()
            .read(true)
            .write(direction.is_output())
            .open(self.value_path())?;
        self.value = Some(file);
        self.direction = direction;
        Ok(())
    }

    /// Switch the pin direction at runtime.
    ///
    /// Any edge watch on the value file is unaffected; the kernel only raises
    /// edges while the pin is an input.
    pub fn set_direction(&mut self, direction: Direction) -> Result<(), HalError> {
        self.configure(direction)?;
        log::debug!("gpio{} direction now {}", self.gpio, direction.as_sysfs());
        Ok(())
    }

    /// Kernel GPIO number.
    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    /// Source key edge events for this pin are reported under.
    pub fn key(&self) -> SourceKey {
        SourceKey(self.gpio)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The pin's `gpioN` directory.
    pub fn directory(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.gpio))
    }

    /// The pin's `gpioN/value` file, the path edge watches are placed on.
    pub fn value_path(&self) -> PathBuf {
        self.directory().join(GPIO_VALUE_FILE)
    }

    fn value_file(&mut self) -> Result<&mut File, HalError> {
        let gpio = self.gpio;
        self.value
            .as_mut()
            .ok_or_else(|| HalError::ResourceClosed(format!("gpio{gpio} value file closed")))
    }

    /// Select the edges that raise events.
    pub fn set_edge(&self, edge: Edge) -> Result<(), HalError> {
        write_attr(&self.directory().join("edge"), edge.as_sysfs())
    }

    /// Current level; the value file is re-read from offset 0.
    pub fn read_value(&mut self) -> Result<bool, HalError> {
        let file = self.value_file()?;
        let mut buf = [0u8; 1];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        Ok(buf[0] == HIGH_VALUE)
    }

    /// Drive the pin; fails with `InvalidArgument` while it is an input.
    pub fn write_value(&mut self, value: bool) -> Result<(), HalError> {
        if !self.direction.is_output() {
            return Err(HalError::InvalidArgument(format!(
                "gpio{} is an input, cannot set its value",
                self.gpio
            )));
        }
        let file = self.value_file()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&[if value { HIGH_VALUE } else { LOW_VALUE }])?;
        Ok(())
    }
}

impl Resource for SysFsPin {
    fn describe(&self) -> String {
        format!("gpio{}", self.gpio)
    }

    fn release(&mut self) -> Result<(), HalError> {
        self.value = None;
        if self.exported {
            self.exported = false;
            write_attr(&self.root.join("unexport"), &self.gpio.to_string())?;
            log::debug!("Unexported gpio{}", self.gpio);
        }
        Ok(())
    }
}

/// Digital input with optional edge events.
#[derive(Debug)]
pub struct GpioInput {
    handle: DeviceHandle<SysFsPin>,
}

impl GpioInput {
    /// Open `gpio` as an input and select the edges that raise events.
    pub fn open(config: &HalConfig, gpio: u32, edge: Edge) -> Result<Self, HalError> {
        let handle = DeviceHandle::new(SysFsPin::open(config, gpio, Direction::In)?);
        handle.resource()?.set_edge(edge)?;
        Ok(Self { handle })
    }

    /// Kernel GPIO number; fails once closed.
    pub fn gpio(&self) -> Result<u32, HalError> {
        Ok(self.handle.resource()?.gpio())
    }

    /// Current level.
    pub fn value(&mut self) -> Result<bool, HalError> {
        self.handle.resource_mut()?.read_value()
    }

    /// Deliver this pin's edge events to `listener` until unsubscribed or closed.
    pub fn subscribe_edges<L>(&mut self, bridge: &EdgeEventBridge, listener: L) -> Result<(), HalError>
    where
        L: EdgeListener + 'static,
    {
        let pin = self.handle.resource()?;
        let (key, path) = (pin.key(), pin.value_path());
        self.handle.subscribe(bridge, key, path, listener)
    }

    pub fn unsubscribe(&mut self) -> Result<(), HalError> {
        self.handle.unsubscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handle.is_subscribed()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn close(&mut self) -> Result<(), HalError> {
        self.handle.close()
    }
}

/// Digital output.
#[derive(Debug)]
pub struct GpioOutput {
    handle: DeviceHandle<SysFsPin>,
}

impl GpioOutput {
    /// Open `gpio` as an output driven to `initial` without a glitch.
    pub fn open(config: &HalConfig, gpio: u32, initial: bool) -> Result<Self, HalError> {
        let direction = if initial { Direction::OutHigh } else { Direction::Out };
        let pin = SysFsPin::open(config, gpio, direction)?;
        Ok(Self {
            handle: DeviceHandle::new(pin),
        })
    }

    /// Kernel GPIO number; fails once closed.
    pub fn gpio(&self) -> Result<u32, HalError> {
        Ok(self.handle.resource()?.gpio())
    }

    /// Current level.
    pub fn value(&mut self) -> Result<bool, HalError> {
        self.handle.resource_mut()?.read_value()
    }

    pub fn set_value(&mut self, value: bool) -> Result<(), HalError> {
        self.handle.resource_mut()?.write_value(value)
    }

    /// Invert the level; returns the new one.
    pub fn toggle(&mut self) -> Result<bool, HalError> {
        let pin = self.handle.resource_mut()?;
        let next = !pin.read_value()?;
        pin.write_value(next)?;
        Ok(next)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn close(&mut self) -> Result<(), HalError> {
        self.handle.close()
    }
}

/// Pin whose direction can change at runtime, with edge events available
/// while it is an input.
#[derive(Debug)]
pub struct GpioInputOutput {
    handle: DeviceHandle<SysFsPin>,
}

impl GpioInputOutput {
    /// Open `gpio` with the given initial direction.
    pub fn open(config: &HalConfig, gpio: u32, direction: Direction) -> Result<Self, HalError> {
        let pin = SysFsPin::open(config, gpio, direction)?;
        Ok(Self {
            handle: DeviceHandle::new(pin),
        })
    }

    /// Kernel GPIO number; fails once closed.
    pub fn gpio(&self) -> Result<u32, HalError> {
        Ok(self.handle.resource()?.gpio())
    }

    pub fn direction(&self) -> Result<Direction, HalError> {
        Ok(self.handle.resource()?.direction())
    }

    /// Rewrite `gpioN/direction` and reopen the value file to match. An
    /// existing edge subscription is kept.
    pub fn set_direction(&mut self, direction: Direction) -> Result<(), HalError> {
        self.handle.resource_mut()?.set_direction(direction)
    }

    pub fn set_edge(&self, edge: Edge) -> Result<(), HalError> {
        self.handle.resource()?.set_edge(edge)
    }

    /// Current level.
    pub fn value(&mut self) -> Result<bool, HalError> {
        self.handle.resource_mut()?.read_value()
    }

    /// Drive the pin; fails with `InvalidArgument` while it is an input.
    pub fn set_value(&mut self, value: bool) -> Result<(), HalError> {
        self.handle.resource_mut()?.write_value(value)
    }

    /// Deliver this pin's edge events to `listener` until unsubscribed or closed.
    pub fn subscribe_edges<L>(&mut self, bridge: &EdgeEventBridge, listener: L) -> Result<(), HalError>
    where
        L: EdgeListener + 'static,
    {
        let pin = self.handle.resource()?;
        let (key, path) = (pin.key(), pin.value_path());
        self.handle.subscribe(bridge, key, path, listener)
    }

    pub fn unsubscribe(&mut self) -> Result<(), HalError> {
        self.handle.unsubscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handle.is_subscribed()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn close(&mut self) -> Result<(), HalError> {
        self.handle.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A fake sysfs tree with `gpio<n>` already exported.
    fn fake_sysfs(gpio: u32, value: &str) -> (TempDir, HalConfig) {
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join(format!("gpio{gpio}"));
        std::fs::create_dir(&pin_dir).unwrap();
        std::fs::write(pin_dir.join("value"), value).unwrap();
        std::fs::write(pin_dir.join("direction"), "in").unwrap();
        std::fs::write(pin_dir.join("edge"), "none").unwrap();
        let config = HalConfig {
            gpio_sysfs_root: dir.path().to_path_buf(),
            export_settle_ms: 20,
            ..HalConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn test_input_configures_edge_and_reads() {
        let (dir, config) = fake_sysfs(17, "1\n");
        let mut input = GpioInput::open(&config, 17, Edge::Both).unwrap();
        assert!(input.value().unwrap());

        let pin_dir = dir.path().join("gpio17");
        assert_eq!(std::fs::read_to_string(pin_dir.join("edge")).unwrap(), "both");
        assert_eq!(std::fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");

        input.close().unwrap();
        assert!(input.value().unwrap_err().is_closed());
        assert!(!dir.path().join("unexport").exists());
    }

    #[test]
    fn test_output_write_and_toggle() {
        let (dir, config) = fake_sysfs(27, "0\n");
        let mut output = GpioOutput::open(&config, 27, true).unwrap();
        let pin_dir = dir.path().join("gpio27");
        assert_eq!(std::fs::read_to_string(pin_dir.join("direction")).unwrap(), "high");

        output.set_value(true).unwrap();
        assert!(output.value().unwrap());
        assert!(!output.toggle().unwrap());
        assert!(std::fs::read_to_string(pin_dir.join("value")).unwrap().starts_with('0'));
    }

    #[test]
    fn test_input_rejects_write() {
        let (_dir, config) = fake_sysfs(4, "0");
        let mut pin = SysFsPin::open(&config, 4, Direction::In).unwrap();
        assert!(matches!(pin.write_value(true), Err(HalError::InvalidArgument(_))));
    }

    #[test]
    fn test_export_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = HalConfig {
            gpio_sysfs_root: dir.path().to_path_buf(),
            export_settle_ms: 10,
            ..HalConfig::default()
        };
        let result = SysFsPin::open(&config, 23, Direction::In);
        assert!(matches!(result, Err(HalError::Io(_))));
        assert_eq!(std::fs::read_to_string(dir.path().join("export")).unwrap(), "23");
        assert_eq!(std::fs::read_to_string(dir.path().join("unexport")).unwrap(), "23");
    }

    #[test]
    fn test_input_output_switches_direction() {
        let (dir, config) = fake_sysfs(5, "0\n");
        let pin_dir = dir.path().join("gpio5");
        let mut pin = GpioInputOutput::open(&config, 5, Direction::In).unwrap();
        assert_eq!(pin.direction().unwrap(), Direction::In);
        assert!(matches!(pin.set_value(true), Err(HalError::InvalidArgument(_))));

        pin.set_direction(Direction::Out).unwrap();
        assert_eq!(pin.direction().unwrap(), Direction::Out);
        assert_eq!(std::fs::read_to_string(pin_dir.join("direction")).unwrap(), "low");
        pin.set_value(true).unwrap();
        assert!(pin.value().unwrap());
        assert!(std::fs::read_to_string(pin_dir.join("value")).unwrap().starts_with('1'));

        pin.set_direction(Direction::In).unwrap();
        assert_eq!(std::fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");
        pin.set_edge(Edge::Rising).unwrap();
        assert_eq!(std::fs::read_to_string(pin_dir.join("edge")).unwrap(), "rising");
        assert!(matches!(pin.set_value(false), Err(HalError::InvalidArgument(_))));

        pin.close().unwrap();
        assert!(pin.set_direction(Direction::Out).unwrap_err().is_closed());
    }

    #[test]
    fn test_input_output_keeps_subscription_across_direction_change() {
        use crate::gpio::{EdgeEvent, MockPollingProvider};
        use std::sync::Arc;

        let (_dir, config) = fake_sysfs(6, "0\n");
        let provider = Arc::new(MockPollingProvider::new());
        let bridge = EdgeEventBridge::new(provider.clone());
        let mut pin = GpioInputOutput::open(&config, 6, Direction::In).unwrap();

        pin.subscribe_edges(&bridge, |_e: EdgeEvent| {}).unwrap();
        pin.set_direction(Direction::OutHigh).unwrap();
        pin.set_direction(Direction::In).unwrap();
        assert!(pin.is_subscribed());
        assert!(bridge.is_registered(SourceKey(6)));

        pin.close().unwrap();
        assert!(!bridge.is_registered(SourceKey(6)));
        bridge.close().unwrap();
    }
}
