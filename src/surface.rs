//! Boundary the OPC-UA adapter consumes. The adapter owns nodes, browse
//! names and subscriptions; the core hands it a trait object per reactor
//! plus snapshot types it can map onto writable variables.

use async_trait::async_trait;

use crate::control::ControlError;
use crate::data::ControlConfig;
use crate::modbus::ModbusError;
use crate::reactor::{ReactorHandle, ReactorStatus};
use crate::sensor::CalibrationReport;

/// Snapshot of one actuator's control-method object: the writable variable
/// set plus the read-only mirror of the last written output.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMethodView {
    /// 0 manual, 1 timer, 2 on_boundaries, 3 pid
    pub method: u8,
    pub value: f64,
    pub time_on: f64,
    pub time_off: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub setpoint: f64,
    /// Index into the sensor enumeration, 0 meaning "none"
    pub reference_sensor: usize,
    pub curr_value: f64,
}

/// Per-reactor control surface.
#[async_trait]
pub trait ControlSurface: Send + Sync {
    fn reactor_id(&self) -> &str;

    fn status(&self) -> ReactorStatus;

    /// Sensor ids in enumeration order; index 0 of the external enumeration
    /// is "none" and maps to no entry here.
    fn sensors(&self) -> Vec<String>;

    async fn set_control_config(&self, actuator: &str, config: &ControlConfig)
        -> Result<(), ControlError>;

    async fn set_reference_sensor(&self, actuator: &str, sensor: Option<String>) -> bool;

    async fn control_method(&self, actuator: &str) -> Option<ControlMethodView>;

    /// `channel` arrives as the adapter's int64; negative indexes are
    /// refused.
    async fn set_pairing(&self, sensor: &str, actuator: &str, channel: i64) -> bool;

    async fn unpair(&self, sensor: &str, actuator: &str, channel: i64) -> bool;

    async fn calibration(
        &self,
        sensor: &str,
        point: &str,
        value: f64,
    ) -> Result<CalibrationReport, ModbusError>;
}

#[async_trait]
impl ControlSurface for ReactorHandle {
    fn reactor_id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> ReactorStatus {
        ReactorHandle::status(self)
    }

    fn sensors(&self) -> Vec<String> {
        self.sensor_ids()
    }

    async fn set_control_config(
        &self,
        actuator: &str,
        config: &ControlConfig,
    ) -> Result<(), ControlError> {
        ReactorHandle::set_control_config(self, actuator, config).await
    }

    async fn set_reference_sensor(&self, actuator: &str, sensor: Option<String>) -> bool {
        ReactorHandle::set_reference_sensor(self, actuator, sensor).await
    }

    async fn control_method(&self, actuator: &str) -> Option<ControlMethodView> {
        let shared = self.actuator(actuator)?;
        let sensors = self.sensor_ids();
        let guard = shared.lock().await;
        let config = guard.control_config();
        let reference = guard
            .reference_sensor()
            .and_then(|id| sensors.iter().position(|s| s == id))
            .map(|k| k + 1)
            .unwrap_or(0);
        Some(ControlMethodView {
            method: config.method.index(),
            value: config.value.unwrap_or(0.0),
            time_on: config.time_on.unwrap_or(0.0),
            time_off: config.time_off.unwrap_or(0.0),
            lower_bound: config.lower_bound.unwrap_or(0.0),
            upper_bound: config.upper_bound.unwrap_or(0.0),
            setpoint: config.setpoint.unwrap_or(0.0),
            reference_sensor: reference,
            curr_value: guard.curr_value(),
        })
    }

    async fn set_pairing(&self, sensor: &str, actuator: &str, channel: i64) -> bool {
        let Ok(channel) = usize::try_from(channel) else {
            return false;
        };
        ReactorHandle::set_pairing(self, sensor, actuator, channel).await
    }

    async fn unpair(&self, sensor: &str, actuator: &str, channel: i64) -> bool {
        let Ok(channel) = usize::try_from(channel) else {
            return false;
        };
        ReactorHandle::unpair(self, sensor, actuator, channel).await
    }

    async fn calibration(
        &self,
        sensor: &str,
        point: &str,
        value: f64,
    ) -> Result<CalibrationReport, ModbusError> {
        ReactorHandle::calibration(self, sensor, point, value).await
    }
}
