use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};

use crate::control::{ControlError, ControlFactory, Controller};
use crate::data::{ChannelAddress, ControlConfig, PhysicalInfo, Transport};
use crate::dictlist::HasId;
use crate::modbus::{ModbusHandle, Request, WireValue};
use crate::plc::{PinMode, SharedIo};
use crate::timer::{SamplingEvent, SharedTimer, SubscriberClass, SubscriberToken};

/// PWM resolution of the PLC outputs; commanded values clamp here.
pub const OUTPUT_RANGE: [f64; 2] = [0.0, 4095.0];

/// The closed set of commandable transducers.
#[derive(Debug)]
pub enum Actuator {
    Random(RandomActuator),
    Plc(PlcActuator),
    Modbus(ModbusActuator),
}

/// State every actuator variant owns: its controller, its recompute timer
/// and the last value that actually reached the transport.
#[derive(Debug)]
struct Core {
    id: String,
    info: PhysicalInfo,
    factory: ControlFactory,
    controller: Controller,
    reference: Option<String>,
    base_timer: SharedTimer,
    timer: SharedTimer,
    sampling: SamplingEvent,
    token: SubscriberToken,
    last_written: Option<f64>,
    curr_value: f64,
}

impl Core {
    fn new(id: &str, info: PhysicalInfo, base_timer: SharedTimer, factory: ControlFactory) -> Core {
        let (token, sampling) = base_timer.subscribe(SubscriberClass::Actuator);
        Core {
            id: id.into(),
            info,
            factory,
            controller: Controller::default_manual(),
            reference: None,
            timer: base_timer.clone(),
            base_timer,
            sampling,
            token,
            last_written: None,
            curr_value: 0.0,
        }
    }

    fn set_control_config(&mut self, config: &ControlConfig) -> Result<(), ControlError> {
        let new = self.factory.create(config)?;
        // An equal controller keeps the running one and its internal state
        if new == self.controller {
            debug!("{}: control config unchanged", self.id);
            return Ok(());
        }
        info!("control config update - {}: {}", self.id, new.describe());
        self.controller = new;
        Ok(())
    }

    /// Bind (or unbind) the reference sensor. The actuator recomputes on
    /// the referenced sensor's cadence; unbinding restores the reactor base
    /// timer. The old subscription is always revoked first.
    fn set_reference_sensor(&mut self, reference: Option<(String, SharedTimer)>) {
        self.timer.unsubscribe(self.token);
        let (reference, timer) = match reference {
            Some((id, timer)) => (Some(id), timer),
            None => (None, self.base_timer.clone()),
        };
        let (token, sampling) = timer.subscribe(SubscriberClass::Actuator);
        self.timer = timer;
        self.token = token;
        self.sampling = sampling;
        self.reference = reference;
        debug!("{}: reference sensor -> {:?}", self.id, self.reference);
    }

    fn next_value(&mut self, input: Option<f64>) -> Option<f64> {
        let fired = self.sampling.take();
        let dt = self.timer.elapsed();
        match self.controller.evaluate(fired, input, dt) {
            Ok(value) => Some(value),
            Err(ControlError::MissingReference) => {
                warn!("{}: no reference value, setting output = 0", self.id);
                Some(0.0)
            }
            Err(e) => {
                error!("{}: controller failed: {}", self.id, e);
                None
            }
        }
    }

    fn committed(&mut self, value: f64) {
        self.last_written = Some(value);
        self.curr_value = value;
        if let Some(channel) = self.info.channels.first_mut() {
            channel.value = Some(value);
        }
    }
}

impl Actuator {
    fn core(&self) -> &Core {
        match self {
            Actuator::Random(a) => &a.core,
            Actuator::Plc(a) => &a.core,
            Actuator::Modbus(a) => &a.core,
        }
    }

    fn core_mut(&mut self) -> &mut Core {
        match self {
            Actuator::Random(a) => &mut a.core,
            Actuator::Plc(a) => &mut a.core,
            Actuator::Modbus(a) => &mut a.core,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn info(&self) -> &PhysicalInfo {
        &self.core().info
    }

    pub fn transport(&self) -> Transport {
        self.core().info.transport
    }

    /// Mirror of the last value written to the transport.
    pub fn curr_value(&self) -> f64 {
        self.core().curr_value
    }

    pub fn reference_sensor(&self) -> Option<&str> {
        self.core().reference.as_deref()
    }

    /// Live controller configuration, for the external control surface.
    pub fn control_config(&self) -> ControlConfig {
        self.core().controller.config()
    }

    /// Swap the factory used for future `set_control_config` calls, e.g.
    /// to widen PID equality per the rig configuration.
    pub fn set_control_factory(&mut self, factory: ControlFactory) {
        self.core_mut().factory = factory;
    }

    pub fn set_control_config(&mut self, config: &ControlConfig) -> Result<(), ControlError> {
        self.core_mut().set_control_config(config)
    }

    pub fn set_reference_sensor(&mut self, reference: Option<(String, SharedTimer)>) {
        self.core_mut().set_reference_sensor(reference);
    }

    /// Evaluate the controller against the given reference value and push
    /// the result to the transport. Unchanged values are skipped.
    pub async fn write_output(&mut self, input: Option<f64>) {
        if let Some(value) = self.core_mut().next_value(input) {
            self.write(value).await;
        }
    }

    /// Fast-loop path: re-evaluate and re-assert without touching any bus.
    /// Only PWM transports live in the fast partition, so a bus-bound
    /// actuator showing up here is a partitioning bug.
    pub fn reassert(&mut self) {
        let Some(value) = self.core_mut().next_value(None) else {
            return;
        };
        if self.core().last_written == Some(value) {
            return;
        }
        match self {
            Actuator::Random(a) => {
                a.push(value);
                a.core.committed(value);
            }
            Actuator::Plc(a) => match a.push(value) {
                Ok(()) => a.core.committed(value),
                Err(e) => error!("{}: write failed: {}", a.core.id, e),
            },
            Actuator::Modbus(a) => {
                debug!("{}: bus actuator in the fast path, skipped", a.core.id);
            }
        }
    }

    /// Change-gated transport write.
    pub async fn write(&mut self, value: f64) {
        if self.core().last_written == Some(value) {
            return;
        }
        self.push_to_transport(value).await;
    }

    /// Ungated write, used by the shutdown path.
    pub async fn force_write(&mut self, value: f64) {
        self.push_to_transport(value).await;
    }

    async fn push_to_transport(&mut self, value: f64) {
        let result = match self {
            Actuator::Random(a) => {
                a.push(value);
                Ok(())
            }
            Actuator::Plc(a) => a.push(value),
            Actuator::Modbus(a) => a.push(value).await,
        };
        match result {
            Ok(()) => self.core_mut().committed(value),
            // Transport faults never abort the loop; the stale cache means
            // the write is retried on the next change of pace
            Err(e) => error!("{}: write failed: {}", self.id(), e),
        }
    }
}

impl HasId for Actuator {
    fn id(&self) -> &str {
        Actuator::id(self)
    }
}

/// Test stub counting the writes that reach the "hardware".
#[derive(Debug)]
pub struct RandomActuator {
    core: Core,
    writes: usize,
}

impl RandomActuator {
    pub fn new(id: &str, info: PhysicalInfo, base_timer: SharedTimer) -> Actuator {
        Actuator::Random(RandomActuator {
            core: Core::new(id, info, base_timer, ControlFactory::new()),
            writes: 0,
        })
    }

    fn push(&mut self, value: f64) {
        self.writes += 1;
        debug!("{} = {}", self.core.id, value);
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

/// Analog/PWM pin output on the PLC.
#[derive(Debug)]
pub struct PlcActuator {
    core: Core,
    io: SharedIo,
    pin: String,
}

impl PlcActuator {
    pub fn new(
        id: &str,
        info: PhysicalInfo,
        base_timer: SharedTimer,
        io: SharedIo,
    ) -> Result<Actuator> {
        let pin = match &info.channels.first().map(|ch| &ch.address) {
            Some(ChannelAddress::Pin(pin)) => pin.to_string(),
            _ => return Err(anyhow!("actuator {} has no output pin", id)),
        };
        io.pin_mode(&pin, PinMode::Output)?;
        io.analog_write_set_frequency(&pin, 24)?;
        Ok(Actuator::Plc(PlcActuator {
            core: Core::new(id, info, base_timer, ControlFactory::new()),
            io,
            pin,
        }))
    }

    fn push(&mut self, value: f64) -> Result<()> {
        let code = value.clamp(OUTPUT_RANGE[0], OUTPUT_RANGE[1]).round() as u16;
        self.io.analog_write(&self.pin, code)
    }
}

/// Modbus-addressed output device (mass-flow controllers and friends).
#[derive(Debug)]
pub struct ModbusActuator {
    core: Core,
    modbus: ModbusHandle,
    register: u16,
}

impl ModbusActuator {
    pub fn new(
        id: &str,
        info: PhysicalInfo,
        base_timer: SharedTimer,
        modbus: ModbusHandle,
    ) -> Result<Actuator> {
        let register = match &info.channels.first().map(|ch| &ch.address) {
            Some(ChannelAddress::Register(symbol)) => parse_register(symbol)?,
            _ => return Err(anyhow!("actuator {} has no output register", id)),
        };
        Ok(Actuator::Modbus(ModbusActuator {
            core: Core::new(id, info, base_timer, ControlFactory::new()),
            modbus,
            register,
        }))
    }

    async fn push(&mut self, value: f64) -> Result<()> {
        self.modbus
            .process_request(Request::Write {
                slave: self.core.info.address,
                register: self.register,
                values: vec![WireValue::F32(value as f32)],
            })
            .await?;
        Ok(())
    }
}

fn parse_register(symbol: &str) -> Result<u16> {
    let parsed = match symbol.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => symbol.parse(),
    };
    parsed.map_err(|_| anyhow!("bad register address {:?}", symbol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Channel, PhysicalInfo, Transport};

    fn pwm_info() -> PhysicalInfo {
        PhysicalInfo::new(
            "actuator",
            0,
            0.0,
            Transport::Pwm,
            vec![Channel::new("analog", "pump", ChannelAddress::Pin("Q0.5".into()))],
        )
        .unwrap()
    }

    fn random(id: &str) -> (Actuator, SharedTimer) {
        let timer = SharedTimer::new(0.0);
        (RandomActuator::new(id, pwm_info(), timer.clone()), timer)
    }

    fn writes(actuator: &Actuator) -> usize {
        match actuator {
            Actuator::Random(a) => a.writes(),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn repeated_outputs_reach_the_transport_once() {
        let (mut actuator, timer) = random("pump_0");
        actuator
            .set_control_config(&ControlConfig::manual(2000.0))
            .unwrap();
        for _ in 0..3 {
            timer.tick();
            actuator.write_output(None).await;
        }
        assert_eq!(actuator.curr_value(), 2000.0);
        assert_eq!(writes(&actuator), 1);
    }

    #[tokio::test]
    async fn equal_config_keeps_controller_state() {
        let (mut actuator, timer) = random("pump_0");
        let config = ControlConfig::pid(35.0);
        actuator.set_control_config(&config).unwrap();

        // Build up some integral with a stuck reference
        for _ in 0..10 {
            timer.tick();
            actuator.write_output(Some(0.0)).await;
        }
        let before = actuator.curr_value();
        assert!(before > 0.0);

        // Same config again: the running controller survives
        actuator.set_control_config(&config).unwrap();
        timer.tick();
        actuator.write_output(Some(0.0)).await;
        assert!(actuator.curr_value() > before);
    }

    #[tokio::test]
    async fn invalid_config_keeps_the_previous_controller() {
        let (mut actuator, timer) = random("pump_0");
        actuator
            .set_control_config(&ControlConfig::manual(1234.0))
            .unwrap();

        let mut broken = ControlConfig::pid(35.0);
        broken.setpoint = None;
        assert!(actuator.set_control_config(&broken).is_err());

        timer.tick();
        actuator.write_output(None).await;
        assert_eq!(actuator.curr_value(), 1234.0);
    }

    #[tokio::test]
    async fn missing_reference_drives_zero() {
        let (mut actuator, timer) = random("pump_0");
        actuator
            .set_control_config(&ControlConfig::on_boundaries(1.0, 2.0, 255.0))
            .unwrap();
        timer.tick();
        actuator.write_output(None).await;
        assert_eq!(actuator.curr_value(), 0.0);
        assert_eq!(writes(&actuator), 1);
    }

    #[tokio::test]
    async fn reference_swap_moves_the_subscription() {
        let (mut actuator, base) = random("pump_0");
        let sensor_timer = SharedTimer::new(0.0);
        actuator.set_reference_sensor(Some(("ph_0".into(), sensor_timer.clone())));
        assert_eq!(actuator.reference_sensor(), Some("ph_0"));

        // Base timer firings no longer reach the actuator
        base.tick();
        actuator
            .set_control_config(&ControlConfig::on_boundaries(1.0, 2.0, 255.0))
            .unwrap();
        actuator.write_output(Some(0.0)).await;
        assert_eq!(actuator.curr_value(), 0.0);

        // The sensor timer does
        sensor_timer.tick();
        actuator.write_output(Some(0.0)).await;
        assert_eq!(actuator.curr_value(), 255.0);

        // Unset restores the base timer
        actuator.set_reference_sensor(None);
        assert_eq!(actuator.reference_sensor(), None);
        base.tick();
        actuator.write_output(Some(5.0)).await;
        assert_eq!(actuator.curr_value(), 0.0);
    }

    #[tokio::test]
    async fn plc_actuator_clamps_to_pwm_range() {
        use crate::plc::builtin::PlcIo;
        use std::sync::Arc;

        let io = Arc::new(PlcIo::new().unwrap());
        let timer = SharedTimer::new(0.0);
        let mut actuator = PlcActuator::new("pump_1", pwm_info(), timer.clone(), io.clone()).unwrap();
        actuator
            .set_control_config(&ControlConfig::manual(2000.0))
            .unwrap();
        timer.tick();
        actuator.write_output(None).await;
        assert_eq!(io.output("Q0.5"), Some(2000));

        actuator.force_write(5000.0).await;
        assert_eq!(io.output("Q0.5"), Some(4095));
    }
}
