//! # HAL Configuration
//!
//! Board-level settings loaded once at startup: where the i2c-dev and sysfs
//! GPIO interfaces live, the process-wide default byte order and the name of
//! the polling thread. All fields have defaults that match a stock Linux SBC,
//! so a configuration file only needs to list what differs.
//!
//! ```json
//! { "gpio_sysfs_root": "/sys/class/gpio", "default_byte_order": "little-endian" }
//! ```

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_GPIO_SYSFS_ROOT, DEFAULT_I2C_DEVICE_PREFIX, DEFAULT_POLL_THREAD_NAME};
use crate::error::HalError;
use crate::util::bytes::ByteOrder;

/// Byte order used when a caller omits one.
const FALLBACK_BYTE_ORDER: ByteOrder = ByteOrder::BigEndian;

static DEFAULT_BYTE_ORDER: OnceCell<ByteOrder> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Prefix of the i2c-dev character devices; the controller id is appended.
    pub i2c_device_prefix: String,
    /// sysfs GPIO class directory holding `export`, `unexport` and `gpioN/`.
    pub gpio_sysfs_root: PathBuf,
    /// Byte order for the `*_default` register helpers.
    pub default_byte_order: ByteOrder,
    /// Thread name of the edge-event bridge worker.
    pub poll_thread_name: String,
    /// Time to wait after exporting a pin for udev to fix permissions.
    pub export_settle_ms: u64,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            i2c_device_prefix: DEFAULT_I2C_DEVICE_PREFIX.to_string(),
            gpio_sysfs_root: PathBuf::from(DEFAULT_GPIO_SYSFS_ROOT),
            default_byte_order: FALLBACK_BYTE_ORDER,
            poll_thread_name: DEFAULT_POLL_THREAD_NAME.to_string(),
            export_settle_ms: 50,
        }
    }
}

impl HalConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, HalError> {
        let config: HalConfig =
            serde_json::from_str(json).map_err(|e| HalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HalError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            HalError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), HalError> {
        if self.i2c_device_prefix.is_empty() {
            return Err(HalError::Config("i2c_device_prefix must not be empty".into()));
        }
        if self.poll_thread_name.is_empty() {
            return Err(HalError::Config("poll_thread_name must not be empty".into()));
        }
        Ok(())
    }

    /// Path of the i2c-dev node for `controller`.
    pub fn i2c_device_path(&self, controller: u8) -> PathBuf {
        PathBuf::from(format!("{}{}", self.i2c_device_prefix, controller))
    }

    /// Install process-wide defaults from this configuration.
    ///
    /// The default byte order can only be set once; later calls keep the
    /// first value and log a warning if it differs.
    pub fn install_defaults(&self) {
        if DEFAULT_BYTE_ORDER.set(self.default_byte_order).is_err() {
            let current = default_byte_order();
            if current != self.default_byte_order {
                log::warn!(
                    "Default byte order already set to {:?}, ignoring {:?}",
                    current,
                    self.default_byte_order
                );
            }
        }
    }
}

/// The process-wide default byte order (big-endian unless installed otherwise).
pub fn default_byte_order() -> ByteOrder {
    *DEFAULT_BYTE_ORDER.get_or_init(|| FALLBACK_BYTE_ORDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HalConfig::default();
        assert_eq!(config.i2c_device_path(1), PathBuf::from("/dev/i2c-1"));
        assert_eq!(config.gpio_sysfs_root, PathBuf::from("/sys/class/gpio"));
        assert_eq!(config.default_byte_order, ByteOrder::BigEndian);
    }

    #[test]
    fn test_partial_json() {
        let config = HalConfig::from_json(
            r#"{ "gpio_sysfs_root": "/tmp/gpio", "default_byte_order": "little-endian" }"#,
        )
        .unwrap();
        assert_eq!(config.gpio_sysfs_root, PathBuf::from("/tmp/gpio"));
        assert_eq!(config.default_byte_order, ByteOrder::LittleEndian);
        assert_eq!(config.i2c_device_prefix, "/dev/i2c-");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            HalConfig::from_json("{ not json"),
            Err(HalError::Config(_))
        ));
        assert!(matches!(
            HalConfig::from_json(r#"{ "poll_thread_name": "" }"#),
            Err(HalError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hal.json");
        std::fs::write(&path, r#"{ "export_settle_ms": 0 }"#).unwrap();
        let config = HalConfig::from_file(&path).unwrap();
        assert_eq!(config.export_settle_ms, 0);

        assert!(HalConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
