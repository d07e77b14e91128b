use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{Calibration, Channel, ChannelAddress, PhysicalInfo, Transport};

pub const OPC_NAMESPACE: &str = "http://czlab/biocontroller";
pub const DEFAULT_OPC_PORT: u16 = 4840;
pub const ALTERNATE_OPC_PORT: u16 = 55488;

fn default_volume() -> f64 {
    5.0
}

fn default_period() -> f64 {
    7.0
}

fn default_baudrate() -> u32 {
    19200
}

fn default_timeout_ms() -> u64 {
    500
}

/// What makes two PID configurations "the same" when a control config is
/// replaced. `Setpoint` is the classic comparison; `Full` also rebuilds on
/// gain or limit changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidEqualityMode {
    #[default]
    Setpoint,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub modbus: Option<ModbusConfig>,
    #[serde(default)]
    pub pid_equality: PidEqualityMode,
    pub reactors: Vec<ReactorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    pub id: String,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default = "default_period")]
    pub period: f64,
    pub sensors: Vec<TransducerConfig>,
    pub actuators: Vec<TransducerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransducerKind {
    Random,
    Analog,
    Hamilton,
    Spectral,
    Plc,
    Modbus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransducerConfig {
    pub id: String,
    pub kind: TransducerKind,
    #[serde(flatten)]
    pub info: PhysicalInfo,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// A three-pump, two-probe rig on random transducers, for machines
    /// without the hardware.
    pub fn demo() -> Config {
        let sensor = |id: &str, info: PhysicalInfo| TransducerConfig {
            id: id.into(),
            kind: TransducerKind::Random,
            info,
        };
        let pump = |id: &str, pin: &str| TransducerConfig {
            id: id.into(),
            kind: TransducerKind::Random,
            info: catalog::pump(pin),
        };
        Config {
            experiment: ExperimentConfig {
                name: "demo".into(),
                volume: 5.0,
            },
            modbus: None,
            pid_equality: PidEqualityMode::default(),
            reactors: vec![ReactorConfig {
                id: "R0".into(),
                volume: 5.0,
                period: 2.0,
                sensors: vec![
                    sensor("ph_0", catalog::ph_probe(0x01)),
                    sensor("do_0", catalog::do_probe(0x09)),
                ],
                actuators: vec![
                    pump("pump_0", "Q0.5"),
                    pump("pump_1", "Q0.6"),
                    pump("pump_2", "Q0.7"),
                ],
            }],
        }
    }
}

/// The physical catalog of the rig. Hamilton probes divide the 1-32
/// address space as 1-8 pH, 9-16 dissolved oxygen, 17-24 incyte, 25-32
/// CO2.
pub mod catalog {
    use super::*;

    pub fn ph_probe(address: u8) -> PhysicalInfo {
        PhysicalInfo::new_sampled(
            "ArcPh",
            address,
            3.0,
            Transport::Digital,
            vec![
                Channel::new("pH", "pH", ChannelAddress::Register("pmc1".into())),
                Channel::new("oC", "degree_celsius", ChannelAddress::Register("pmc6".into())),
            ],
        )
        .expect("catalog entry is well-formed")
    }

    pub fn do_probe(address: u8) -> PhysicalInfo {
        PhysicalInfo::new_sampled(
            "VisiFerm",
            address,
            1.0,
            Transport::Digital,
            vec![
                Channel::new("ppm", "dissolved_oxygen", ChannelAddress::Register("pmc1".into())),
                Channel::new("oC", "degree_celsius", ChannelAddress::Register("pmc6".into())),
            ],
        )
        .expect("catalog entry is well-formed")
    }

    pub fn analog_ph(pin: &str) -> PhysicalInfo {
        PhysicalInfo::new_sampled(
            "analog",
            0,
            5.0,
            Transport::Analog,
            vec![Channel::new("ph", "ph", ChannelAddress::Pin(pin.into())).with_calibration(
                Calibration {
                    file: "ph_250328.csv".into(),
                    a: 34.0,
                    b: 5.0,
                },
            )],
        )
        .expect("catalog entry is well-formed")
    }

    pub fn spectral(address: u8) -> PhysicalInfo {
        let channels = crate::sensor::spectral::BANDS
            .iter()
            .map(|band| Channel::new(band, "band", ChannelAddress::Band((*band).into())))
            .collect();
        PhysicalInfo::new_sampled("Spectral", address, 5.0, Transport::Digital, channels)
            .expect("catalog entry is well-formed")
    }

    pub fn pump(pin: &str) -> PhysicalInfo {
        PhysicalInfo::new(
            "actuator",
            0,
            0.0,
            Transport::Pwm,
            vec![Channel::new("analog", "pump", ChannelAddress::Pin(pin.into()))],
        )
        .expect("catalog entry is well-formed")
    }

    pub fn mfc(address: u8, register: &str) -> PhysicalInfo {
        PhysicalInfo::new(
            "actuator",
            address,
            0.0,
            Transport::Digital,
            vec![Channel::new("sccm", "mass_flow", ChannelAddress::Register(register.into()))],
        )
        .expect("catalog entry is well-formed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_config_is_well_formed() {
        let config = Config::demo();
        assert_eq!(config.reactors.len(), 1);
        let reactor = &config.reactors[0];
        assert_eq!(reactor.sensors.len(), 2);
        assert_eq!(reactor.actuators.len(), 3);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Config::demo();
        let raw = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.reactors[0].id, "R0");
        assert_eq!(back.reactors[0].sensors[0].info.model, "ArcPh");
    }

    #[test]
    fn config_parses_from_literal_json() {
        let raw = r#"{
            "experiment": { "name": "run_42" },
            "modbus": { "port": "/dev/ttySC2" },
            "reactors": [{
                "id": "R1",
                "sensors": [{
                    "id": "ph_0", "kind": "hamilton",
                    "model": "ArcPh", "address": 1, "sample_interval": 3.0,
                    "transport": "digital",
                    "channels": [
                        { "units": "pH", "description": "pH",
                          "address": { "register": "pmc1" } }
                    ]
                }],
                "actuators": [{
                    "id": "pump_0", "kind": "plc",
                    "model": "actuator", "address": 0, "sample_interval": 0.0,
                    "transport": "pwm",
                    "channels": [
                        { "units": "analog", "description": "pump",
                          "address": { "pin": "Q0.5" } }
                    ]
                }]
            }]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.modbus.unwrap().baudrate, 19200);
        assert_eq!(config.reactors[0].period, 7.0);
        assert_eq!(config.reactors[0].sensors[0].kind, TransducerKind::Hamilton);
    }
}
