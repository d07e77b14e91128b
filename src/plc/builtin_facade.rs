//! Pin driver facade for machines without the PLC hardware. Mirrors the
//! builtin driver surface; reads come from a seedable input bank, writes
//! land in a bank tests can inspect.

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use log::debug;

use super::{PinMode, PlatformIo};

#[derive(Debug, Default)]
pub struct PlcIo {
    modes: DashMap<String, PinMode>,
    inputs: DashMap<String, u16>,
    outputs: DashMap<String, u16>,
}

impl PlcIo {
    pub fn new() -> Result<PlcIo> {
        Ok(PlcIo::default())
    }

    /// Seed the raw code an input pin reads back.
    pub fn set_input(&self, pin: &str, raw: u16) {
        self.inputs.insert(pin.into(), raw.min(4095));
    }

    pub fn output(&self, pin: &str) -> Option<u16> {
        self.outputs.get(pin).map(|v| *v)
    }
}

impl PlatformIo for PlcIo {
    fn pin_mode(&self, pin: &str, mode: PinMode) -> Result<()> {
        debug!("pin {} set to {:?}", pin, mode);
        self.modes.insert(pin.into(), mode);
        Ok(())
    }

    fn analog_read(&self, pin: &str) -> Result<u16> {
        match self.modes.get(pin).map(|m| *m) {
            Some(PinMode::Input) => Ok(self.inputs.get(pin).map(|v| *v).unwrap_or(0)),
            _ => Err(anyhow!("pin {} is not configured as input", pin)),
        }
    }

    fn analog_write(&self, pin: &str, value: u16) -> Result<()> {
        debug!("analog write {} = {}", pin, value);
        self.outputs.insert(pin.into(), value.min(4095));
        Ok(())
    }

    fn analog_write_set_frequency(&self, pin: &str, hz: u32) -> Result<()> {
        debug!("pwm frequency on {} = {} Hz", pin, hz);
        Ok(())
    }
}
