//! Driver for Hamilton Arc digital probes (pH, dissolved oxygen, incyte,
//! CO2 families) over the Modbus dispatcher.
//!
//! Register addresses are stored 0-based; the vendor datasheet numbers
//! registers from 1. Only the subset the controller touches is mapped:
//!
//! ```text
//! operator    4287 x4   operator level code + password
//! address     4095 x2   device address (specialist)
//! baudrate    4101 x2   baud code (specialist)
//! pmc1        2089 x10  primary measurement, status, range
//! pmc6        2409 x10  secondary measurement (temperature)
//! cp1..cp6    5161..    calibration-point value
//! cp*_status  5157..    status/unit/value triple
//! quality     4871 x2   quality indicator
//! ```
//!
//! The probe itself decides whether a calibration succeeds (stability over
//! the last 3 minutes, standard match, slope/offset tolerance); the host
//! only initiates and reports.

use std::collections::HashMap;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;

use crate::data::{ChannelAddress, PhysicalInfo};
use crate::modbus::{
    baud_code, decode_f32, decode_u32, ModbusError, ModbusHandle, Request, WireValue,
};
use crate::timer::{SamplingEvent, SharedTimer, SubscriberClass, SubscriberToken};

#[derive(Debug, Clone, Copy)]
pub struct RegisterBlock {
    pub address: u16,
    pub count: u16,
}

const fn block(address: u16, count: u16) -> RegisterBlock {
    RegisterBlock { address, count }
}

pub static REGISTER_MAP: Lazy<HashMap<&'static str, RegisterBlock>> = Lazy::new(|| {
    HashMap::from([
        ("operator", block(4287, 4)),
        ("address", block(4095, 2)),
        ("baudrate", block(4101, 2)),
        ("pmc1", block(2089, 10)),
        ("pmc6", block(2409, 10)),
        ("cp1", block(5161, 2)),
        ("cp2", block(5193, 2)),
        ("cp6", block(5321, 2)),
        ("cp1_status", block(5157, 6)),
        ("cp2_status", block(5189, 6)),
        ("cp6_status", block(5317, 6)),
        ("quality", block(4871, 2)),
    ])
});

pub const CALIBRATION_POINTS: [&str; 3] = ["cp1", "cp2", "cp6"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorLevel {
    pub name: &'static str,
    pub code: u32,
    pub password: u32,
}

pub const USER: OperatorLevel = OperatorLevel { name: "user", code: 0x03, password: 0 };
pub const ADMINISTRATOR: OperatorLevel =
    OperatorLevel { name: "administrator", code: 0x0C, password: 18_111_978 };
pub const SPECIALIST: OperatorLevel =
    OperatorLevel { name: "specialist", code: 0x30, password: 16_021_966 };

/// Result of a calibration-point write: the probe's status word mapped to
/// text, the value the probe applied, the quality indicator and the primary
/// measurement right after the calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub status: String,
    pub value: f64,
    pub quality: f64,
    pub measurement: f64,
}

fn calibration_status(code: u32) -> String {
    match code {
        0 => "Ok".into(),
        1 => "Out of range".into(),
        2 => "Unstable".into(),
        4 => "Wrong standard".into(),
        n => format!("Error({n})"),
    }
}

#[derive(Debug)]
pub struct HamiltonSensor {
    id: String,
    info: PhysicalInfo,
    address: u8,
    modbus: ModbusHandle,
    timer: SharedTimer,
    sampling: SamplingEvent,
    _token: SubscriberToken,
}

impl HamiltonSensor {
    pub fn new(id: &str, info: PhysicalInfo, modbus: ModbusHandle) -> HamiltonSensor {
        let timer = SharedTimer::new(info.sample_interval);
        let (token, sampling) = timer.subscribe(SubscriberClass::Sensor);
        sampling.raise();
        info!("hamilton sensor {} at address {}", id, info.address);
        HamiltonSensor {
            id: id.into(),
            address: info.address,
            info,
            modbus,
            timer,
            sampling,
            _token: token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> &PhysicalInfo {
        &self.info
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    pub fn request_sample(&self) {
        self.sampling.raise();
    }

    pub(crate) fn warn_no_calibration_table(&self) {
        warn!("{}: hamilton probes calibrate on-device, table ignored", self.id);
    }

    fn register(symbol: &str) -> Result<RegisterBlock, ModbusError> {
        REGISTER_MAP
            .get(symbol)
            .copied()
            .ok_or_else(|| ModbusError::UnknownSymbol(symbol.into()))
    }

    /// Read a register block by its symbolic name.
    pub async fn read_holding_registers(&self, symbol: &str) -> Result<Vec<u16>, ModbusError> {
        let block = Self::register(symbol)?;
        self.modbus
            .process_request(Request::ReadHolding {
                slave: self.address,
                register: block.address,
                count: block.count,
            })
            .await
    }

    /// Write a register block by its symbolic name.
    pub async fn write_registers(
        &self,
        symbol: &str,
        values: Vec<WireValue>,
    ) -> Result<(), ModbusError> {
        let block = Self::register(symbol)?;
        self.modbus
            .process_request(Request::Write {
                slave: self.address,
                register: block.address,
                values,
            })
            .await?;
        Ok(())
    }

    async fn set_operator_level(&self, level: &OperatorLevel) -> Result<(), ModbusError> {
        debug!("{}: operator level -> {}", self.id, level.name);
        self.write_registers(
            "operator",
            vec![WireValue::U32(level.code), WireValue::U32(level.password)],
        )
        .await
    }

    /// Reprogram the probe's bus address. The local address only follows a
    /// successful write, so a failure leaves the driver talking to the old
    /// address.
    pub async fn set_address(&mut self, new_address: u8) -> Result<(), ModbusError> {
        self.set_operator_level(&SPECIALIST).await?;
        let written = self
            .write_registers("address", vec![WireValue::U32(u32::from(new_address))])
            .await;
        if written.is_ok() {
            info!("{}: address {} -> {}", self.id, self.address, new_address);
            self.address = new_address;
        }
        let dropped = self.set_operator_level(&USER).await;
        written.and(dropped)
    }

    /// Reprogram the probe's baud rate. The host side keeps its old
    /// configuration; reconfiguring the dispatcher is the caller's job.
    pub async fn set_baudrate(&self, baudrate: u32) -> Result<(), ModbusError> {
        let code = baud_code(baudrate).ok_or(ModbusError::InvalidBaud(baudrate))?;
        self.set_operator_level(&SPECIALIST).await?;
        let written = self
            .write_registers("baudrate", vec![WireValue::U32(u32::from(code))])
            .await;
        let dropped = self.set_operator_level(&USER).await;
        written.and(dropped)
    }

    /// Bulk measurement parameter write, e.g. the PA9 moving average.
    pub async fn set_measurement_configs(
        &self,
        params: &[(&str, WireValue)],
    ) -> Result<(), ModbusError> {
        self.set_operator_level(&SPECIALIST).await?;
        let mut written = Ok(());
        for (symbol, value) in params {
            written = self.write_registers(symbol, vec![*value]).await;
            if written.is_err() {
                break;
            }
        }
        let dropped = self.set_operator_level(&USER).await;
        written.and(dropped)
    }

    /// Sample every channel from its measurement block. Any bus error marks
    /// all channels unread and the scheduler carries on.
    pub async fn read(&mut self) {
        self.timer.tick();
        if !self.sampling.take() {
            return;
        }

        let mut values = Vec::with_capacity(self.info.channels.len());
        for channel in &self.info.channels {
            let ChannelAddress::Register(symbol) = &channel.address else {
                values.push(Err(ModbusError::UnknownSymbol(channel.units.clone())));
                break;
            };
            // The measurement float sits at words [2..4] of the block
            let value = match self.read_holding_registers(symbol).await {
                Ok(registers) if registers.len() >= 4 => {
                    decode_f32(&registers[2..4]).map(f64::from)
                }
                Ok(registers) => Err(ModbusError::Codec(format!(
                    "{symbol} returned {} registers",
                    registers.len()
                ))),
                Err(e) => Err(e),
            };
            match value {
                Ok(v) => values.push(Ok(v)),
                Err(e) => {
                    values.push(Err(e));
                    break;
                }
            }
        }

        if let Some(Err(e)) = values.iter().find(|v| v.is_err()) {
            error!("{}: read failed, marking channels unread: {}", self.id, e);
            for channel in &mut self.info.channels {
                channel.value = None;
            }
            return;
        }
        for (channel, value) in self.info.channels.iter_mut().zip(values) {
            channel.value = value.ok();
        }
    }

    /// Write a calibration point and report what the probe made of it.
    ///
    /// Four steps: raise to specialist, write the point, read back the
    /// point status, the quality indicator and the primary measurement,
    /// drop to user. On error the sequence aborts but the level drop is
    /// still attempted.
    pub async fn write_calibration(
        &self,
        point: &str,
        value: f64,
    ) -> Result<CalibrationReport, ModbusError> {
        if !CALIBRATION_POINTS.contains(&point) {
            return Err(ModbusError::UnknownSymbol(point.into()));
        }
        self.set_operator_level(&SPECIALIST).await?;
        let report = self.calibration_sequence(point, value).await;
        let dropped = self.set_operator_level(&USER).await;
        if let Err(e) = &report {
            error!("{}: calibration on {} aborted: {}", self.id, point, e);
        }
        let report = report?;
        dropped?;
        Ok(report)
    }

    async fn calibration_sequence(
        &self,
        point: &str,
        value: f64,
    ) -> Result<CalibrationReport, ModbusError> {
        self.write_registers(point, vec![WireValue::F32(value as f32)])
            .await?;

        let status_block = self
            .read_holding_registers(&format!("{point}_status"))
            .await?;
        if status_block.len() < 6 {
            return Err(ModbusError::Codec(format!(
                "{point}_status returned {} registers",
                status_block.len()
            )));
        }
        let status = decode_u32(&status_block[0..2])?;
        let applied = decode_f32(&status_block[4..6])?;

        let quality_block = self.read_holding_registers("quality").await?;
        let quality = decode_f32(&quality_block[0..2])?;

        let pmc1 = self.read_holding_registers("pmc1").await?;
        let measurement = decode_f32(&pmc1[2..4])?;

        Ok(CalibrationReport {
            status: calibration_status(status),
            value: f64::from(applied),
            quality: f64::from(quality),
            measurement: f64::from(measurement),
        })
    }
}
