//! Mock register transport for testing
//!
//! Simulates a device with an auto-incrementing register file, so drivers
//! and the register channel can be exercised without hardware. Clones share
//! state: keep one clone for inspection and hand the other to the channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::HalError;
use crate::i2c::{RegisterAddress, RegisterTransport, SubAddressWidth};

/// One operation observed by the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Open,
    Close,
    Write {
        width: SubAddressWidth,
        register: u16,
        data: Vec<u8>,
    },
    Read {
        width: SubAddressWidth,
        register: u16,
        len: usize,
    },
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    registers: HashMap<u16, u8>,
    log: Vec<Transaction>,
    failures: VecDeque<String>,
    short_read: Option<usize>,
}

/// In-memory transport backed by a register file.
///
/// Reads of registers that were never written return `0x00`. Multi-byte
/// transfers touch consecutive registers, like most sensor parts do.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Preload a single register.
    pub fn set_register(&self, register: u16, value: u8) {
        self.state().registers.insert(register, value);
    }

    /// Preload consecutive registers starting at `start`.
    pub fn set_registers(&self, start: u16, values: &[u8]) {
        let mut state = self.state();
        for (i, value) in values.iter().enumerate() {
            state.registers.insert(start.wrapping_add(i as u16), *value);
        }
    }

    /// Current content of `register`.
    pub fn register(&self, register: u16) -> u8 {
        self.state().registers.get(&register).copied().unwrap_or(0)
    }

    /// Everything the transport has been asked to do so far.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().log.clone()
    }

    /// Number of read and write transactions (open/close excluded).
    pub fn io_count(&self) -> usize {
        self.state()
            .log
            .iter()
            .filter(|t| matches!(t, Transaction::Write { .. } | Transaction::Read { .. }))
            .count()
    }

    pub fn clear_transactions(&self) {
        self.state().log.clear();
    }

    /// Make the next read or write fail with `message` (a NACK, say).
    pub fn fail_next(&self, message: &str) {
        self.state().failures.push_back(message.to_string());
    }

    /// Make the next read return only `n` bytes.
    pub fn short_read_next(&self, n: usize) {
        self.state().short_read = Some(n);
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }
}

impl MockState {
    fn check_io(&mut self, address: &RegisterAddress) -> Result<(), HalError> {
        if !self.open {
            return Err(HalError::Transport(format!("{address}: transport not open")));
        }
        if let Some(message) = self.failures.pop_front() {
            return Err(HalError::Transport(format!("{address}: {message}")));
        }
        Ok(())
    }
}

impl RegisterTransport for MockTransport {
    fn open(&mut self) -> Result<(), HalError> {
        let mut state = self.state();
        state.open = true;
        state.log.push(Transaction::Open);
        Ok(())
    }

    fn close(&mut self) -> Result<(), HalError> {
        let mut state = self.state();
        if state.open {
            state.open = false;
            state.log.push(Transaction::Close);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        MockTransport::is_open(self)
    }

    fn write(&mut self, address: &RegisterAddress, data: &[u8]) -> Result<(), HalError> {
        let mut state = self.state();
        state.log.push(Transaction::Write {
            width: address.width,
            register: address.register,
            data: data.to_vec(),
        });
        state.check_io(address)?;
        for (i, byte) in data.iter().enumerate() {
            state
                .registers
                .insert(address.register.wrapping_add(i as u16), *byte);
        }
        Ok(())
    }

    fn read(&mut self, address: &RegisterAddress, buf: &mut [u8]) -> Result<usize, HalError> {
        let mut state = self.state();
        state.log.push(Transaction::Read {
            width: address.width,
            register: address.register,
            len: buf.len(),
        });
        state.check_io(address)?;
        let n = state.short_read.take().map_or(buf.len(), |n| n.min(buf.len()));
        for (i, slot) in buf.iter_mut().take(n).enumerate() {
            *slot = state
                .registers
                .get(&address.register.wrapping_add(i as u16))
                .copied()
                .unwrap_or(0);
        }
        Ok(n)
    }
}
