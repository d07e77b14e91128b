pub mod actuator;
pub mod config;
pub mod control;
pub mod data;
pub mod dictlist;
pub mod mirror;
pub mod modbus;
pub mod plc;
pub mod reactor;
pub mod sensor;
pub mod surface;
pub mod timer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use actuator::Actuator;
pub use control::{ControlError, ControlFactory, Controller, PidEquality};
pub use data::{Calibration, Channel, ChannelAddress, ControlConfig, ControlMethod, PhysicalInfo, Transport};
pub use dictlist::DictList;
pub use modbus::{ModbusDispatcher, ModbusError, ModbusHandle, Request, WireValue};
pub use reactor::{PairingError, Reactor, ReactorHandle};
pub use sensor::Sensor;
pub use timer::{SamplingEvent, SharedTimer, SubscriberClass, SubscriberToken};
