//! AS7341-class 10-band spectral sensor for biomass estimation.
//!
//! The I2C bus is one shared line behind a multiplexer, so every read goes
//! through the global bus mutex, and the blocking vendor read runs off the
//! cooperative loop.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{error, trace};

use crate::data::{Channel, PhysicalInfo};
use crate::timer::{SamplingEvent, SharedTimer, SubscriberClass, SubscriberToken};

/// Band tags in vendor read-out order.
pub const BANDS: [&str; 10] = [
    "415", "445", "480", "515", "555", "590", "630", "680", "clear", "nir",
];

/// The consumed vendor surface: one synchronous full-spectrum read on the
/// multiplexer channel this sensor is bound to.
pub trait SpectralBus: Send {
    fn read_all(&mut self) -> Result<[f64; 10]>;
}

/// The global I2C serialization point shared by every spectral sensor.
pub type SharedSpectralBus = Arc<Mutex<Box<dyn SpectralBus>>>;

pub fn shared_bus(bus: Box<dyn SpectralBus>) -> SharedSpectralBus {
    Arc::new(Mutex::new(bus))
}

/// Fixed-spectrum stand-in for rigs without the hardware.
#[derive(Debug, Clone)]
pub struct SimSpectral {
    counts: [f64; 10],
}

impl SimSpectral {
    pub fn new(counts: [f64; 10]) -> SimSpectral {
        SimSpectral { counts }
    }
}

impl SpectralBus for SimSpectral {
    fn read_all(&mut self) -> Result<[f64; 10]> {
        Ok(self.counts)
    }
}

pub struct SpectralSensor {
    id: String,
    info: PhysicalInfo,
    bus: SharedSpectralBus,
    timer: SharedTimer,
    sampling: SamplingEvent,
    _token: SubscriberToken,
}

impl std::fmt::Debug for SpectralSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralSensor")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("timer", &self.timer)
            .field("sampling", &self.sampling)
            .finish()
    }
}

impl SpectralSensor {
    pub fn new(id: &str, info: PhysicalInfo, bus: SharedSpectralBus) -> SpectralSensor {
        let timer = SharedTimer::new(info.sample_interval);
        let (token, sampling) = timer.subscribe(SubscriberClass::Sensor);
        sampling.raise();
        SpectralSensor {
            id: id.into(),
            info,
            bus,
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

    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    pub fn request_sample(&self) {
        self.sampling.raise();
    }

    pub(crate) fn channels_mut(&mut self) -> &mut Vec<Channel> {
        &mut self.info.channels
    }

    pub async fn read(&mut self) {
        self.timer.tick();
        if !self.sampling.take() {
            return;
        }

        let bus = self.bus.clone();
        let counts = tokio::task::spawn_blocking(move || {
            let mut bus = bus.lock().unwrap();
            bus.read_all()
        })
        .await;

        match counts {
            Ok(Ok(counts)) => {
                for (band, count) in BANDS.iter().zip(counts.iter()) {
                    // Bands route to the channel carrying their tag as unit
                    if let Some(channel) = self
                        .info
                        .channels
                        .iter_mut()
                        .find(|ch| ch.units == *band)
                    {
                        channel.value = Some(*count);
                    }
                }
                trace!("{} sampled {} bands", self.id, BANDS.len());
            }
            Ok(Err(e)) => {
                error!("{}: spectral read failed: {}", self.id, e);
                self.mark_unread();
            }
            Err(e) => {
                error!("{}: spectral worker died: {}", self.id, e);
                self.mark_unread();
            }
        }
    }

    fn mark_unread(&mut self) {
        for channel in &mut self.info.channels {
            channel.value = None;
        }
    }
}
