//! Shared constants for register transactions and sysfs GPIO access.

/// Sub-address (register number) encoded in one byte.
pub const SUB_ADDRESS_SIZE_1_BYTE: u8 = 1;

/// Sub-address (register number) encoded in two bytes, MSB first.
pub const SUB_ADDRESS_SIZE_2_BYTES: u8 = 2;

/// Widest integer that `read_uint` composes (u32 accumulator).
pub const MAX_UINT_BYTES: usize = 4;

/// Highest bit index within a register byte.
pub const MAX_BIT_INDEX: u8 = 7;

/// Default i2c-dev character device prefix (`/dev/i2c-1` for controller 1).
pub const DEFAULT_I2C_DEVICE_PREFIX: &str = "/dev/i2c-";

/// Default sysfs GPIO class directory.
pub const DEFAULT_GPIO_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Name of the per-pin value file inside `gpioN/`.
pub const GPIO_VALUE_FILE: &str = "value";

/// ASCII byte a sysfs value file holds for a high level.
pub const HIGH_VALUE: u8 = b'1';

/// ASCII byte a sysfs value file holds for a low level.
pub const LOW_VALUE: u8 = b'0';

/// Thread name used by the edge-event bridge worker.
pub const DEFAULT_POLL_THREAD_NAME: &str = "sbc-hal-poll";

/// Maximum readiness events drained per epoll wake-up.
pub const MAX_POLL_EVENTS: usize = 16;
