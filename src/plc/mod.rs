use std::fmt;
use std::sync::Arc;

use anyhow::Result;

#[cfg(target_arch = "arm")]
pub mod builtin;

#[cfg(not(target_arch = "arm"))]
pub mod builtin_facade;

#[cfg(not(target_arch = "arm"))]
pub use builtin_facade as builtin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// The PLC pin driver surface. Drivers get a handle at construction so the
/// vendor binding never becomes process-global state, and tests swap in the
/// facade.
pub trait PlatformIo: Send + Sync + fmt::Debug {
    fn pin_mode(&self, pin: &str, mode: PinMode) -> Result<()>;

    /// 12-bit sample, 0..4095.
    fn analog_read(&self, pin: &str) -> Result<u16>;

    fn analog_write(&self, pin: &str, value: u16) -> Result<()>;

    fn analog_write_set_frequency(&self, pin: &str, hz: u32) -> Result<()>;
}

pub type SharedIo = Arc<dyn PlatformIo>;
