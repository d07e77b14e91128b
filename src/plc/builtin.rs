//! Pin driver for the RPi-based industrial PLC. Analog inputs go through
//! the on-board ADS1115 (one-shot, 4.096V range); analog outputs are
//! software-PWM on the mapped GPIO pins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::debug;
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;

use super::{PinMode, PlatformIo};

// Default ADS1115 address when the addr pin is tied to GND
const ADC_ADDRESS: u16 = 0b1001000;

// Output pin names to BCM numbers on the carrier board
const OUTPUT_PINS: [(&str, u8); 4] = [
    ("Q0.5", 12),
    ("Q0.6", 13),
    ("Q0.7", 16),
    ("Q0.8", 26),
];

// Analog input names to ADS1115 mux config: single-shot, 4.096V, 860SPS
const INPUT_PINS: [(&str, [u8; 3]); 4] = [
    ("I0.0", [0b00000001, 0b11000011, 0b11100011]),
    ("I0.1", [0b00000001, 0b11010011, 0b11100011]),
    ("I0.2", [0b00000001, 0b11100011, 0b11100011]),
    ("I0.3", [0b00000001, 0b11110011, 0b11100011]),
];

#[derive(Debug)]
pub struct PlcIo {
    i2c: Mutex<I2c>,
    outputs: Mutex<HashMap<String, OutputPin>>,
    frequencies: Mutex<HashMap<String, f64>>,
}

impl PlcIo {
    pub fn new() -> Result<PlcIo> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(ADC_ADDRESS)?;
        Ok(PlcIo {
            i2c: Mutex::new(i2c),
            outputs: Mutex::new(HashMap::new()),
            frequencies: Mutex::new(HashMap::new()),
        })
    }

    fn mux_config(pin: &str) -> Result<[u8; 3]> {
        INPUT_PINS
            .iter()
            .find(|(name, _)| *name == pin)
            .map(|(_, config)| *config)
            .ok_or_else(|| anyhow!("unknown analog input {}", pin))
    }

    fn bcm(pin: &str) -> Result<u8> {
        OUTPUT_PINS
            .iter()
            .find(|(name, _)| *name == pin)
            .map(|(_, bcm)| *bcm)
            .ok_or_else(|| anyhow!("unknown output pin {}", pin))
    }
}

impl PlatformIo for PlcIo {
    fn pin_mode(&self, pin: &str, mode: PinMode) -> Result<()> {
        match mode {
            PinMode::Input => {
                // Inputs live on the ADC, nothing to claim
                Self::mux_config(pin)?;
            }
            PinMode::Output => {
                let gpio = Gpio::new()?;
                let out = gpio.get(Self::bcm(pin)?)?.into_output();
                self.outputs.lock().unwrap().insert(pin.into(), out);
            }
        }
        debug!("pin {} set to {:?}", pin, mode);
        Ok(())
    }

    fn analog_read(&self, pin: &str) -> Result<u16> {
        let config = Self::mux_config(pin)?;
        let mut i2c = self.i2c.lock().unwrap();
        i2c.write(&config)?;

        // Wait time = nominal data period + 10% + 20us, 860SPS -> 1.16ms
        thread::sleep(Duration::from_micros(1300));

        let mut buffer = [0u8; 2];
        i2c.write_read(&[0b00000000], &mut buffer)?;
        let raw = i16::from_be_bytes(buffer).max(0);

        // 15-bit ADC code down to the 12-bit PLC range
        Ok((raw >> 3) as u16)
    }

    fn analog_write(&self, pin: &str, value: u16) -> Result<()> {
        let frequency = self
            .frequencies
            .lock()
            .unwrap()
            .get(pin)
            .copied()
            .unwrap_or(24.0);
        let duty = f64::from(value.min(4095)) / 4095.0;
        let mut outputs = self.outputs.lock().unwrap();
        let out = outputs
            .get_mut(pin)
            .ok_or_else(|| anyhow!("pin {} is not configured as output", pin))?;
        out.set_pwm_frequency(frequency, duty)?;
        debug!("analog write {} = {} ({:.3} duty)", pin, value, duty);
        Ok(())
    }

    fn analog_write_set_frequency(&self, pin: &str, hz: u32) -> Result<()> {
        self.frequencies
            .lock()
            .unwrap()
            .insert(pin.into(), f64::from(hz));
        Ok(())
    }
}
