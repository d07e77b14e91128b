use anyhow::Result;
use log::{error, trace};
use rand::Rng;

pub mod hamilton;
pub mod spectral;

pub use hamilton::{CalibrationReport, HamiltonSensor};
pub use spectral::SpectralSensor;

use crate::data::{Calibration, Channel, ChannelAddress, PhysicalInfo};
use crate::dictlist::HasId;
use crate::plc::{PinMode, SharedIo};
use crate::timer::{SamplingEvent, SharedTimer, SubscriberClass, SubscriberToken};

/// The closed set of value-producing transducers.
#[derive(Debug)]
pub enum Sensor {
    Random(RandomSensor),
    Analog(AnalogSensor),
    Hamilton(HamiltonSensor),
    Spectral(SpectralSensor),
}

impl Sensor {
    pub fn id(&self) -> &str {
        match self {
            Sensor::Random(s) => &s.id,
            Sensor::Analog(s) => &s.id,
            Sensor::Hamilton(s) => s.id(),
            Sensor::Spectral(s) => s.id(),
        }
    }

    pub fn info(&self) -> &PhysicalInfo {
        match self {
            Sensor::Random(s) => &s.info,
            Sensor::Analog(s) => &s.info,
            Sensor::Hamilton(s) => s.info(),
            Sensor::Spectral(s) => s.info(),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.info().channels
    }

    /// The timer driving this sensor's sampling cadence. Actuators bound to
    /// the sensor subscribe here so they recompute in step with it.
    pub fn timer(&self) -> &SharedTimer {
        match self {
            Sensor::Random(s) => &s.timer,
            Sensor::Analog(s) => &s.timer,
            Sensor::Hamilton(s) => s.timer(),
            Sensor::Spectral(s) => s.timer(),
        }
    }

    /// Raise the sampling event so the next `read` samples regardless of
    /// the timer.
    pub fn request_sample(&self) {
        match self {
            Sensor::Random(s) => s.sampling.raise(),
            Sensor::Analog(s) => s.sampling.raise(),
            Sensor::Hamilton(s) => s.request_sample(),
            Sensor::Spectral(s) => s.request_sample(),
        }
    }

    pub async fn read(&mut self) {
        match self {
            Sensor::Random(s) => s.read().await,
            Sensor::Analog(s) => s.read().await,
            Sensor::Hamilton(s) => s.read().await,
            Sensor::Spectral(s) => s.read().await,
        }
    }

    /// Bulk linear calibration, positional by channel.
    pub fn set_calibration(&mut self, table: &[(String, (f64, f64))]) {
        let channels = match self {
            Sensor::Random(s) => &mut s.info.channels,
            Sensor::Analog(s) => &mut s.info.channels,
            Sensor::Hamilton(s) => {
                s.warn_no_calibration_table();
                return;
            }
            Sensor::Spectral(s) => s.channels_mut(),
        };
        for (channel, (file, (a, b))) in channels.iter_mut().zip(table.iter()) {
            channel.calibration = Some(Calibration {
                file: file.clone(),
                a: *a,
                b: *b,
            });
        }
    }
}

impl HasId for Sensor {
    fn id(&self) -> &str {
        Sensor::id(self)
    }
}

/// Test stub producing noise around a plausible setpoint.
#[derive(Debug)]
pub struct RandomSensor {
    id: String,
    info: PhysicalInfo,
    timer: SharedTimer,
    sampling: SamplingEvent,
    _token: SubscriberToken,
}

impl RandomSensor {
    pub fn new(id: &str, info: PhysicalInfo) -> RandomSensor {
        let timer = SharedTimer::new(info.sample_interval);
        let (token, sampling) = timer.subscribe(SubscriberClass::Sensor);
        sampling.raise();
        RandomSensor {
            id: id.into(),
            info,
            timer,
            sampling,
            _token: token,
        }
    }

    async fn read(&mut self) {
        self.timer.tick();
        if self.sampling.take() {
            let mut rng = rand::thread_rng();
            for channel in &mut self.info.channels {
                channel.value = Some(35.0 + rng.gen_range(-1.0..1.0));
            }
            trace!("{} sampled", self.id);
        }
        // Give bus-bound neighbors room on the executor
        tokio::task::yield_now().await;
    }
}

/// A PLC analog input per channel, with optional linear calibration.
#[derive(Debug)]
pub struct AnalogSensor {
    id: String,
    info: PhysicalInfo,
    io: SharedIo,
    timer: SharedTimer,
    sampling: SamplingEvent,
    _token: SubscriberToken,
}

impl AnalogSensor {
    pub fn new(id: &str, info: PhysicalInfo, io: SharedIo) -> Result<AnalogSensor> {
        for channel in &info.channels {
            if let ChannelAddress::Pin(pin) = &channel.address {
                io.pin_mode(pin, PinMode::Input)?;
            }
        }
        let timer = SharedTimer::new(info.sample_interval);
        let (token, sampling) = timer.subscribe(SubscriberClass::Sensor);
        sampling.raise();
        Ok(AnalogSensor {
            id: id.into(),
            info,
            io,
            timer,
            sampling,
            _token: token,
        })
    }

    async fn read(&mut self) {
        self.timer.tick();
        if self.sampling.take() {
            for channel in &mut self.info.channels {
                let ChannelAddress::Pin(pin) = &channel.address else {
                    continue;
                };
                match self.io.analog_read(pin) {
                    Ok(raw) => {
                        let raw = f64::from(raw);
                        channel.value = Some(match &channel.calibration {
                            Some(cal) => cal.apply(raw),
                            None => raw,
                        });
                    }
                    Err(e) => {
                        error!("{}: analog read on {} failed: {}", self.id, pin, e);
                        channel.value = None;
                    }
                }
            }
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Transport;
    use crate::plc::builtin::PlcIo;
    use std::sync::Arc;

    fn analog_info() -> PhysicalInfo {
        PhysicalInfo::new_sampled(
            "analog",
            0,
            0.001,
            Transport::Analog,
            vec![
                Channel::new("ph", "ph", ChannelAddress::Pin("I0.0".into())),
                Channel::new("%", "dissolved_oxygen", ChannelAddress::Pin("I0.1".into())),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn analog_reads_raw_and_calibrated() {
        let io = Arc::new(PlcIo::new().unwrap());
        io.set_input("I0.0", 1000);
        io.set_input("I0.1", 2000);

        let mut sensor = Sensor::Analog(AnalogSensor::new("ph_3", analog_info(), io).unwrap());
        sensor.set_calibration(&[("ph_250328.csv".into(), (0.002, 1.0))]);
        sensor.read().await;

        let channels = sensor.channels();
        assert!((channels[0].value.unwrap() - (0.002 * 1000.0 + 1.0)).abs() < 1e-9);
        assert_eq!(channels[1].value.unwrap(), 2000.0);
    }

    #[tokio::test]
    async fn random_sensor_populates_every_channel() {
        let info = PhysicalInfo::new_sampled(
            "random",
            0,
            0.001,
            Transport::Digital,
            vec![
                Channel::new("pH", "pH", ChannelAddress::None),
                Channel::new("oC", "degree_celsius", ChannelAddress::None),
            ],
        )
        .unwrap();
        let mut sensor = Sensor::Random(RandomSensor::new("rnd_0", info));
        sensor.read().await;
        for channel in sensor.channels() {
            let value = channel.value.unwrap();
            assert!((34.0..=36.0).contains(&value));
        }
    }

    #[tokio::test]
    async fn sampling_is_gated_by_the_timer() {
        let info = PhysicalInfo::new_sampled(
            "random",
            0,
            60.0,
            Transport::Digital,
            vec![Channel::new("pH", "pH", ChannelAddress::None)],
        )
        .unwrap();
        let mut sensor = Sensor::Random(RandomSensor::new("rnd_0", info));
        sensor.read().await;
        let first = sensor.channels()[0].value;
        // The 60s timer cannot have fired again
        sensor.read().await;
        assert_eq!(sensor.channels()[0].value, first);
    }
}
