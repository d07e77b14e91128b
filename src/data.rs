use serde::{Deserialize, Serialize};
use thiserror::Error;

/// In-band "never read or last read failed" marker kept for the external
/// wire representation. Internally a channel value is an `Option`.
pub const WIRE_SENTINEL: f64 = -0.111;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("transducer {0:?} exposes no channels")]
    NoChannels(String),
    #[error("duplicate channel unit {unit:?} on {model:?}")]
    DuplicateUnit { model: String, unit: String },
    #[error("sample interval must be positive, got {0}")]
    BadInterval(f64),
}

/// Output transport of a transducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Pwm,
    Analog,
    Digital,
}

/// Linear regression parameters, reported value = a * raw + b. The file tag
/// names the calibration record for the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub file: String,
    pub a: f64,
    pub b: f64,
}

impl Calibration {
    pub fn apply(&self, raw: f64) -> f64 {
        self.a * raw + self.b
    }
}

/// Where a channel lives on its transducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelAddress {
    /// Symbolic register block name for Modbus devices
    Register(String),
    /// PLC pin identifier, e.g. "Q0.5"
    Pin(String),
    /// Spectral band tag, e.g. "415" or "nir"
    Band(String),
    None,
}

/// A single physical measurement or output lane.
///
/// Two channels compare equal when their unit symbols match; the external
/// interface uses that to deduplicate views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub units: String,
    pub description: String,
    #[serde(default = "ChannelAddress::none")]
    pub address: ChannelAddress,
    #[serde(skip)]
    pub value: Option<f64>,
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

impl ChannelAddress {
    fn none() -> ChannelAddress {
        ChannelAddress::None
    }
}

impl Channel {
    pub fn new(units: &str, description: &str, address: ChannelAddress) -> Channel {
        Channel {
            units: units.into(),
            description: description.into(),
            address,
            value: None,
            calibration: None,
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Channel {
        self.calibration = Some(calibration);
        self
    }

    /// The value as external consumers see it, sentinel included.
    pub fn wire_value(&self) -> f64 {
        self.value.unwrap_or(WIRE_SENTINEL)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Channel) -> bool {
        self.units == other.units
    }
}

/// Immutable transducer metadata. Built at configuration time; only the
/// channel values mutate afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalInfo {
    pub model: String,
    pub address: u8,
    pub sample_interval: f64,
    pub transport: Transport,
    pub channels: Vec<Channel>,
}

impl PhysicalInfo {
    pub fn new(
        model: &str,
        address: u8,
        sample_interval: f64,
        transport: Transport,
        channels: Vec<Channel>,
    ) -> Result<PhysicalInfo, DataError> {
        let info = PhysicalInfo {
            model: model.into(),
            address,
            sample_interval,
            transport,
            channels,
        };
        info.validate()?;
        Ok(info)
    }

    /// Sensor flavor of `new`: the sample interval drives a timer and must
    /// be strictly positive.
    pub fn new_sampled(
        model: &str,
        address: u8,
        sample_interval: f64,
        transport: Transport,
        channels: Vec<Channel>,
    ) -> Result<PhysicalInfo, DataError> {
        let info = PhysicalInfo::new(model, address, sample_interval, transport, channels)?;
        info.validate_sampled()?;
        Ok(info)
    }

    /// The checks `new` applies, for infos that arrive through
    /// deserialization instead.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.channels.is_empty() {
            return Err(DataError::NoChannels(self.model.clone()));
        }
        for (k, ch) in self.channels.iter().enumerate() {
            if self.channels[..k].iter().any(|other| other == ch) {
                return Err(DataError::DuplicateUnit {
                    model: self.model.clone(),
                    unit: ch.units.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn validate_sampled(&self) -> Result<(), DataError> {
        if self.sample_interval <= 0.0 {
            return Err(DataError::BadInterval(self.sample_interval));
        }
        Ok(())
    }
}

/// Available control methods, in the external 0..3 encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMethod {
    Manual,
    Timer,
    OnBoundaries,
    Pid,
}

impl ControlMethod {
    pub fn index(self) -> u8 {
        match self {
            ControlMethod::Manual => 0,
            ControlMethod::Timer => 1,
            ControlMethod::OnBoundaries => 2,
            ControlMethod::Pid => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<ControlMethod> {
        match index {
            0 => Some(ControlMethod::Manual),
            1 => Some(ControlMethod::Timer),
            2 => Some(ControlMethod::OnBoundaries),
            3 => Some(ControlMethod::Pid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlMethod::Manual => "manual",
            ControlMethod::Timer => "timer",
            ControlMethod::OnBoundaries => "on_boundaries",
            ControlMethod::Pid => "pid",
        }
    }
}

/// Configuration record the control factory consumes. Fields not used by
/// the selected method are ignored; missing required fields are an
/// `InvalidConfig` error at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub method: ControlMethod,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub time_on: Option<f64>,
    #[serde(default)]
    pub time_off: Option<f64>,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default)]
    pub backwards: Option<bool>,
    #[serde(default)]
    pub setpoint: Option<f64>,
    #[serde(default)]
    pub gains: Option<[f64; 3]>,
    #[serde(default)]
    pub limits: Option<[f64; 2]>,
}

impl ControlConfig {
    pub fn manual(value: f64) -> ControlConfig {
        ControlConfig {
            value: Some(value),
            ..ControlConfig::empty(ControlMethod::Manual)
        }
    }

    pub fn timer(value: f64, time_on: f64, time_off: f64) -> ControlConfig {
        ControlConfig {
            value: Some(value),
            time_on: Some(time_on),
            time_off: Some(time_off),
            ..ControlConfig::empty(ControlMethod::Timer)
        }
    }

    pub fn on_boundaries(lower_bound: f64, upper_bound: f64, value: f64) -> ControlConfig {
        ControlConfig {
            lower_bound: Some(lower_bound),
            upper_bound: Some(upper_bound),
            value: Some(value),
            ..ControlConfig::empty(ControlMethod::OnBoundaries)
        }
    }

    pub fn pid(setpoint: f64) -> ControlConfig {
        ControlConfig {
            setpoint: Some(setpoint),
            ..ControlConfig::empty(ControlMethod::Pid)
        }
    }

    fn empty(method: ControlMethod) -> ControlConfig {
        ControlConfig {
            method,
            value: None,
            time_on: None,
            time_off: None,
            lower_bound: None,
            upper_bound: None,
            backwards: None,
            setpoint: None,
            gains: None,
            limits: None,
        }
    }
}
