use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;
use tokio::sync::watch;

use biocontrol::actuator::{Actuator, ModbusActuator, PlcActuator, RandomActuator};
use biocontrol::config::{Config, PidEqualityMode, TransducerConfig, TransducerKind};
use biocontrol::control::{ControlFactory, PidEquality};
use biocontrol::mirror::{spawn_mirror, Experiment, LogSink, ValueCache};
use biocontrol::modbus::{sim::SimHandle, ModbusDispatcher, ModbusHandle};
use biocontrol::plc::{builtin::PlcIo, SharedIo};
use biocontrol::reactor::Reactor;
use biocontrol::sensor::spectral::{shared_bus, SharedSpectralBus, SimSpectral};
use biocontrol::sensor::{AnalogSensor, HamiltonSensor, RandomSensor, Sensor, SpectralSensor};
use biocontrol::timer::SharedTimer;

#[derive(Parser, Debug)]
#[command(name = "biocontrol", version, about = "Multi-reactor bioprocess control core")]
struct Args {
    /// Rig configuration; the built-in demo rig runs when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drive simulated buses even when a serial line is configured
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            info!("no config given, running the demo rig");
            Config::demo()
        }
    };

    let modbus = open_modbus(&config, args.simulate)?;
    let io: SharedIo = Arc::new(PlcIo::new()?);
    let spectral: SharedSpectralBus = shared_bus(Box::new(SimSpectral::new([
        120.0, 180.0, 260.0, 310.0, 350.0, 330.0, 280.0, 210.0, 900.0, 60.0,
    ])));

    let cache = ValueCache::new();
    let reactor_ids: Vec<String> = config.reactors.iter().map(|r| r.id.clone()).collect();
    let mirror = spawn_mirror(
        &cache,
        Box::new(LogSink),
        Experiment {
            name: config.experiment.name.clone(),
            date: std::time::SystemTime::now(),
            reactors: reactor_ids.join(","),
            volume: config.experiment.volume,
        },
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    for reactor_config in &config.reactors {
        let base = SharedTimer::new(reactor_config.period);

        let mut sensors = Vec::new();
        for transducer in &reactor_config.sensors {
            sensors.push(build_sensor(transducer, &modbus, &io, &spectral)?);
        }
        let factory = match config.pid_equality {
            PidEqualityMode::Setpoint => ControlFactory::new(),
            PidEqualityMode::Full => ControlFactory::with_pid_equality(PidEquality::Full),
        };
        let mut actuators = Vec::new();
        for transducer in &reactor_config.actuators {
            let mut actuator = build_actuator(transducer, base.clone(), &modbus, &io)?;
            actuator.set_control_factory(factory);
            actuators.push(actuator);
        }

        let reactor = Reactor::new(
            &reactor_config.id,
            reactor_config.volume,
            reactor_config.period,
            base,
            sensors,
            actuators,
            cache.clone(),
        )?;
        let (handle, task) = reactor.spawn(shutdown_rx.clone())?;
        info!("{}: sensors {:?}", handle.id, handle.sensor_ids());
        tasks.push(task);
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt, shutting down");
    shutdown_tx.send(true)?;
    for task in tasks {
        let _ = task.await;
    }

    // Reactors are gone; dropping the cache ends the mirror feed, and the
    // mirror handle joins its thread on drop
    drop(cache);
    drop(mirror);
    Ok(())
}

fn open_modbus(config: &Config, simulate: bool) -> Result<ModbusHandle> {
    if let (Some(modbus), false) = (&config.modbus, simulate) {
        return ModbusDispatcher::open(
            &modbus.port,
            modbus.baudrate,
            Duration::from_millis(modbus.timeout_ms),
        )
        .map_err(|e| anyhow!(e));
    }

    // Simulated line: every configured bus address answers
    let sim = SimHandle::new();
    sim.set_address_register(4095);
    for reactor in &config.reactors {
        for transducer in reactor.sensors.iter().chain(reactor.actuators.iter()) {
            if transducer.info.address != 0 {
                sim.add_device(transducer.info.address);
            }
        }
    }
    Ok(ModbusDispatcher::attach(sim.client(), Duration::from_millis(100)))
}

fn build_sensor(
    transducer: &TransducerConfig,
    modbus: &ModbusHandle,
    io: &SharedIo,
    spectral: &SharedSpectralBus,
) -> Result<Sensor> {
    let TransducerConfig { id, kind, info } = transducer;
    info.validate()?;
    info.validate_sampled()?;
    Ok(match kind {
        TransducerKind::Random => Sensor::Random(RandomSensor::new(id, info.clone())),
        TransducerKind::Analog => {
            Sensor::Analog(AnalogSensor::new(id, info.clone(), io.clone())?)
        }
        TransducerKind::Hamilton => {
            Sensor::Hamilton(HamiltonSensor::new(id, info.clone(), modbus.clone()))
        }
        TransducerKind::Spectral => {
            Sensor::Spectral(SpectralSensor::new(id, info.clone(), spectral.clone()))
        }
        TransducerKind::Plc | TransducerKind::Modbus => {
            return Err(anyhow!("{id}: {kind:?} is an actuator kind"));
        }
    })
}

fn build_actuator(
    transducer: &TransducerConfig,
    base_timer: SharedTimer,
    modbus: &ModbusHandle,
    io: &SharedIo,
) -> Result<Actuator> {
    let TransducerConfig { id, kind, info } = transducer;
    info.validate()?;
    match kind {
        TransducerKind::Random => Ok(RandomActuator::new(id, info.clone(), base_timer)),
        TransducerKind::Plc => PlcActuator::new(id, info.clone(), base_timer, io.clone()),
        TransducerKind::Modbus => ModbusActuator::new(id, info.clone(), base_timer, modbus.clone()),
        other => Err(anyhow!("{id}: {other:?} is a sensor kind")),
    }
}
