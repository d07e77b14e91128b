use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};

use crate::actuator::Actuator;
use crate::control::ControlError;
use crate::data::{ControlConfig, Transport};
use crate::dictlist::{DictList, HasId};
use crate::mirror::{ValueCache, ValueUpdate};
use crate::modbus::ModbusError;
use crate::sensor::{CalibrationReport, Sensor};
use crate::timer::SharedTimer;

/// Cadence of the PWM re-assert loop.
pub const FAST_LOOP_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("actuator {0:?} is already paired")]
    Conflict(String),
    #[error("unknown id {0:?}")]
    UnknownId(String),
    #[error("pairing {sensor:?} -> ({actuator:?}, {channel}) does not exist")]
    NotPaired {
        sensor: String,
        actuator: String,
        channel: usize,
    },
}

/// Reactor run state as the control surface shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReactorStatus {
    #[default]
    Off,
    On,
    Experiment,
}

impl ReactorStatus {
    pub fn index(self) -> u32 {
        match self {
            ReactorStatus::Off => 0,
            ReactorStatus::On => 1,
            ReactorStatus::Experiment => 2,
        }
    }
}

/// An actuator with its own lock, so bus-bound writes never happen under
/// the reactor state lock.
#[derive(Debug, Clone)]
pub struct SharedActuator {
    id: String,
    transport: Transport,
    inner: Arc<AsyncMutex<Actuator>>,
}

impl SharedActuator {
    pub fn new(actuator: Actuator) -> SharedActuator {
        SharedActuator {
            id: actuator.id().to_string(),
            transport: actuator.transport(),
            inner: Arc::new(AsyncMutex::new(actuator)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Actuator> {
        self.inner.lock().await
    }

    /// Fast-thread access; never call from the async loop.
    pub fn blocking_lock(&self) -> tokio::sync::MutexGuard<'_, Actuator> {
        self.inner.blocking_lock()
    }
}

impl HasId for SharedActuator {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Everything the coarse reactor lock guards: the actuators, the pairing
/// table and the fast/slow partitions. Sensors stay with the slow loop and
/// are reached through commands instead.
#[derive(Debug, Default)]
pub struct ReactorState {
    pub actuators: DictList<SharedActuator>,
    sensor_ids: Vec<String>,
    pairings: HashMap<String, Vec<(String, usize)>>,
    fast: Vec<String>,
}

impl ReactorState {
    fn paired_anywhere(&self, actuator_id: &str) -> bool {
        self.pairings
            .values()
            .any(|list| list.iter().any(|(a, _)| a == actuator_id))
    }

    /// Bind a sensor channel to an actuator. Nothing mutates on a refused
    /// pairing.
    pub fn set_pairing(
        &mut self,
        sensor_id: &str,
        actuator_id: &str,
        channel: usize,
    ) -> Result<(), PairingError> {
        if !self.sensor_ids.iter().any(|s| s == sensor_id) {
            return Err(PairingError::UnknownId(sensor_id.into()));
        }
        if !self.actuators.contains(actuator_id) {
            return Err(PairingError::UnknownId(actuator_id.into()));
        }
        if self.paired_anywhere(actuator_id) {
            return Err(PairingError::Conflict(actuator_id.into()));
        }
        self.fast.retain(|id| id != actuator_id);
        self.pairings
            .entry(sensor_id.to_string())
            .or_default()
            .push((actuator_id.to_string(), channel));
        Ok(())
    }

    /// Remove an exact pairing triple. A PWM actuator goes back to the fast
    /// partition; anything else stays slow, where the loop drives it to 0.
    pub fn unpair(
        &mut self,
        sensor_id: &str,
        actuator_id: &str,
        channel: usize,
    ) -> Result<(), PairingError> {
        let not_paired = || PairingError::NotPaired {
            sensor: sensor_id.into(),
            actuator: actuator_id.into(),
            channel,
        };
        let list = self.pairings.get_mut(sensor_id).ok_or_else(not_paired)?;
        let position = list
            .iter()
            .position(|(a, c)| a == actuator_id && *c == channel)
            .ok_or_else(not_paired)?;
        list.remove(position);
        if list.is_empty() {
            self.pairings.remove(sensor_id);
        }
        let transport = self.actuators.get(actuator_id).map(|a| a.transport());
        if transport == Some(Transport::Pwm) {
            self.fast.push(actuator_id.to_string());
        }
        Ok(())
    }

    pub fn sensor_ids(&self) -> &[String] {
        &self.sensor_ids
    }

    pub fn fast_ids(&self) -> &[String] {
        &self.fast
    }

    pub fn pairings_for(&self, sensor_id: &str) -> Vec<(String, usize)> {
        self.pairings.get(sensor_id).cloned().unwrap_or_default()
    }
}

enum Command {
    SetPairing {
        sensor: String,
        actuator: String,
        channel: usize,
        reply: oneshot::Sender<Result<(), PairingError>>,
    },
    Unpair {
        sensor: String,
        actuator: String,
        channel: usize,
        reply: oneshot::Sender<Result<(), PairingError>>,
    },
    Calibrate {
        sensor: String,
        point: String,
        value: f64,
        reply: oneshot::Sender<Result<CalibrationReport, ModbusError>>,
    },
    SetReferenceSensor {
        actuator: String,
        sensor: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    SetAnalogCalibration {
        sensor: String,
        table: Vec<(String, (f64, f64))>,
        reply: oneshot::Sender<bool>,
    },
}

/// A named aggregate of sensors and actuators under one dual-rate loop.
pub struct Reactor {
    pub id: String,
    pub volume: f64,
    pub period: f64,
    base_timer: SharedTimer,
    sensors: DictList<Sensor>,
    state: Arc<StdMutex<ReactorState>>,
    pwm_lock: Arc<StdMutex<()>>,
    cache: ValueCache,
    status: Arc<StdMutex<ReactorStatus>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Option<mpsc::UnboundedReceiver<Command>>,
}

impl Reactor {
    pub fn new(
        id: &str,
        volume: f64,
        period: f64,
        base_timer: SharedTimer,
        sensors: Vec<Sensor>,
        actuators: Vec<Actuator>,
        cache: ValueCache,
    ) -> Result<Reactor> {
        if !id.strip_prefix('R').is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        }) {
            warn!("reactor id {:?} will not browse as a reactor node", id);
        }

        let mut sensor_list = DictList::new();
        for sensor in sensors {
            sensor_list.insert(sensor)?;
        }

        let mut state = ReactorState::default();
        state.sensor_ids = sensor_list.ids().map(String::from).collect();
        for actuator in actuators {
            let shared = SharedActuator::new(actuator);
            if shared.transport() == Transport::Pwm {
                state.fast.push(shared.id().to_string());
            }
            state.actuators.insert(shared)?;
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        info!(
            "reactor {}: {} sensors, {} actuators, period {}s",
            id,
            sensor_list.len(),
            state.actuators.len(),
            period
        );
        Ok(Reactor {
            id: id.into(),
            volume,
            period,
            base_timer,
            sensors: sensor_list,
            state: Arc::new(StdMutex::new(state)),
            pwm_lock: Arc::new(StdMutex::new(())),
            cache,
            status: Arc::new(StdMutex::new(ReactorStatus::Off)),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            id: self.id.clone(),
            cmd: self.cmd_tx.clone(),
            state: self.state.clone(),
            status: self.status.clone(),
        }
    }

    /// Start the slow loop, the fast thread and return immediately. The
    /// returned task completes once a shutdown signal arrived, both loops
    /// wound down and every actuator was driven to 0.
    pub fn spawn(
        mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(ReactorHandle, tokio::task::JoinHandle<()>)> {
        let handle = self.handle();
        let commands = self.cmd_rx.take().expect("reactor spawned once");

        let fast = std::thread::Builder::new()
            .name(format!("{}-fast", self.id))
            .spawn({
                let id = self.id.clone();
                let state = self.state.clone();
                let pwm_lock = self.pwm_lock.clone();
                let shutdown = shutdown.clone();
                move || fast_loop(&id, &state, &pwm_lock, &shutdown)
            })?;

        *self.status.lock().unwrap() = ReactorStatus::On;
        let task = tokio::spawn(async move {
            let state = self.state.clone();
            let status = self.status.clone();
            let id = self.id.clone();
            self.slow_loop(shutdown, commands).await;

            stop(&id, &state).await;
            *status.lock().unwrap() = ReactorStatus::Off;
            if let Err(e) = tokio::task::spawn_blocking(move || fast.join()).await {
                error!("{}: fast loop join failed: {}", id, e);
            }
        });
        Ok((handle, task))
    }

    async fn slow_loop(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let period = Duration::from_secs_f64(self.period);
        let mut next_tick = Instant::now() + period;
        info!("{}: slow loop every {:?}", self.id, period);

        while !*shutdown.borrow() {
            // Admin mutations queued during the previous tick land first
            while let Ok(command) = commands.try_recv() {
                self.handle_command(command).await;
            }

            // 1. Sample every sensor; drivers do their own bus locking
            self.base_timer.async_tick();
            for sensor in self.sensors.iter_mut() {
                sensor.read().await;
            }
            self.mirror_sensors();

            // 2. + 3. Drive paired actuators, zero the unpaired slow ones
            self.apply_outputs().await;
            self.mirror_actuators().await;

            // 4. Drift-free pacing against the previous deadline
            let sleep_for = next_tick.saturating_duration_since(Instant::now());
            next_tick += period;
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("{}: slow loop stopped", self.id);
    }

    async fn apply_outputs(&mut self) {
        // Snapshot the work under the coarse lock; the bus writes happen on
        // the per-actuator locks afterwards
        let (work, zeros) = {
            let state = self.state.lock().unwrap();
            let mut work: Vec<(SharedActuator, Option<f64>)> = Vec::new();
            let mut covered: HashSet<String> = HashSet::new();

            for sensor in self.sensors.iter() {
                for (actuator_id, channel) in state.pairings_for(sensor.id()) {
                    let Some(actuator) = state.actuators.get(&actuator_id) else {
                        warn!("{}: paired actuator {} is gone", self.id, actuator_id);
                        continue;
                    };
                    covered.insert(actuator_id.clone());
                    match sensor.channels().get(channel) {
                        Some(ch) => work.push((actuator.clone(), ch.value)),
                        None => warn!(
                            "{}: channel {} out of range on {}",
                            self.id,
                            channel,
                            sensor.id()
                        ),
                    }
                }
            }

            let zeros: Vec<SharedActuator> = state
                .actuators
                .iter()
                .filter(|a| !covered.contains(a.id()) && !state.fast.iter().any(|f| f == a.id()))
                .cloned()
                .collect();
            (work, zeros)
        };

        for (actuator, value) in work {
            actuator.lock().await.write_output(value).await;
        }
        // Unbound slow devices default to a safe zero
        for actuator in zeros {
            actuator.lock().await.write(0.0).await;
        }
    }

    fn mirror_sensors(&self) {
        for sensor in self.sensors.iter() {
            let info = sensor.info();
            for channel in sensor.channels() {
                self.cache.push(ValueUpdate {
                    reactor: self.id.clone(),
                    entity: sensor.id().to_string(),
                    model: info.model.clone(),
                    units: channel.units.clone(),
                    value: channel.wire_value(),
                    calibration: channel.calibration.as_ref().map(|c| c.file.clone()),
                });
            }
        }
    }

    async fn mirror_actuators(&self) {
        let actuators: Vec<SharedActuator> = {
            let state = self.state.lock().unwrap();
            state.actuators.iter().cloned().collect()
        };
        for shared in actuators {
            let actuator = shared.lock().await;
            let info = actuator.info();
            let units = info
                .channels
                .first()
                .map(|ch| ch.units.clone())
                .unwrap_or_default();
            self.cache.push(ValueUpdate {
                reactor: self.id.clone(),
                entity: actuator.id().to_string(),
                model: info.model.clone(),
                units,
                value: actuator.curr_value(),
                calibration: None,
            });
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetPairing { sensor, actuator, channel, reply } => {
                let result = self
                    .state
                    .lock()
                    .unwrap()
                    .set_pairing(&sensor, &actuator, channel);
                if let Err(e) = &result {
                    warn!("{}: set_pairing refused: {}", self.id, e);
                }
                let _ = reply.send(result);
            }
            Command::Unpair { sensor, actuator, channel, reply } => {
                let result = self.state.lock().unwrap().unpair(&sensor, &actuator, channel);
                if let Err(e) = &result {
                    warn!("{}: unpair refused: {}", self.id, e);
                }
                let _ = reply.send(result);
            }
            Command::Calibrate { sensor, point, value, reply } => {
                let result = match self.sensors.get(&sensor) {
                    Some(Sensor::Hamilton(probe)) => probe.write_calibration(&point, value).await,
                    Some(_) => Err(ModbusError::UnknownSymbol(format!(
                        "{sensor} does not calibrate over the bus"
                    ))),
                    None => Err(ModbusError::UnknownSymbol(format!("unknown sensor {sensor}"))),
                };
                let _ = reply.send(result);
            }
            Command::SetReferenceSensor { actuator, sensor, reply } => {
                let reference = match &sensor {
                    Some(sensor_id) => match self.sensors.get(sensor_id) {
                        Some(s) => Some((sensor_id.clone(), s.timer().clone())),
                        None => {
                            warn!("{}: unknown reference sensor {}", self.id, sensor_id);
                            let _ = reply.send(false);
                            return;
                        }
                    },
                    None => None,
                };
                let shared = self.state.lock().unwrap().actuators.get(&actuator).cloned();
                match shared {
                    Some(a) => {
                        a.lock().await.set_reference_sensor(reference);
                        let _ = reply.send(true);
                    }
                    None => {
                        warn!("{}: unknown actuator {}", self.id, actuator);
                        let _ = reply.send(false);
                    }
                }
            }
            Command::SetAnalogCalibration { sensor, table, reply } => {
                match self.sensors.get_mut(&sensor) {
                    Some(s) => {
                        s.set_calibration(&table);
                        let _ = reply.send(true);
                    }
                    None => {
                        let _ = reply.send(false);
                    }
                }
            }
        }
    }
}

/// Drive every actuator to 0, bypassing the change gate.
async fn stop(id: &str, state: &Arc<StdMutex<ReactorState>>) {
    info!("{}: stopping, zeroing actuators", id);
    let actuators: Vec<SharedActuator> = {
        let state = state.lock().unwrap();
        state.actuators.iter().cloned().collect()
    };
    for shared in actuators {
        shared.lock().await.force_write(0.0).await;
    }
}

/// Re-asserts the unpaired PWM outputs at a rate high enough to mask
/// transient glitches. Runs on its own thread so a busy async loop cannot
/// starve it.
fn fast_loop(
    id: &str,
    state: &Arc<StdMutex<ReactorState>>,
    pwm_lock: &Arc<StdMutex<()>>,
    shutdown: &watch::Receiver<bool>,
) -> Result<()> {
    #[cfg(unix)]
    {
        use thread_priority::*;

        let tid = thread_native_id();
        let policy = ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo);
        let params = ScheduleParams {
            sched_priority: 20 as _,
        };
        if set_thread_schedule_policy(tid, policy, params).is_err() {
            warn!("{}: thread scheduling policy change failed", id);
        }
    }

    while !*shutdown.borrow() {
        let fast: Vec<SharedActuator> = {
            let state = state.lock().unwrap();
            state
                .fast
                .iter()
                .filter_map(|id| state.actuators.get(id).cloned())
                .collect()
        };
        {
            let _pwm = pwm_lock.lock().unwrap();
            for actuator in &fast {
                actuator.blocking_lock().reassert();
            }
        }
        std::thread::sleep(FAST_LOOP_PERIOD);
    }
    debug!("{}: fast loop stopped", id);
    Ok(())
}

/// Clonable admin surface onto a running reactor. Pairing mutations queue
/// onto the slow loop and take effect at the top of its next tick.
#[derive(Clone)]
pub struct ReactorHandle {
    pub id: String,
    cmd: mpsc::UnboundedSender<Command>,
    state: Arc<StdMutex<ReactorState>>,
    status: Arc<StdMutex<ReactorStatus>>,
}

impl ReactorHandle {
    pub async fn set_pairing(&self, sensor: &str, actuator: &str, channel: usize) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::SetPairing {
            sensor: sensor.into(),
            actuator: actuator.into(),
            channel,
            reply,
        };
        self.cmd.send(command).is_ok() && matches!(rx.await, Ok(Ok(())))
    }

    pub async fn unpair(&self, sensor: &str, actuator: &str, channel: usize) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Unpair {
            sensor: sensor.into(),
            actuator: actuator.into(),
            channel,
            reply,
        };
        self.cmd.send(command).is_ok() && matches!(rx.await, Ok(Ok(())))
    }

    pub async fn calibration(
        &self,
        sensor: &str,
        point: &str,
        value: f64,
    ) -> Result<CalibrationReport, ModbusError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Calibrate {
            sensor: sensor.into(),
            point: point.into(),
            value,
            reply,
        };
        self.cmd.send(command).map_err(|_| ModbusError::Closed)?;
        rx.await.map_err(|_| ModbusError::Closed)?
    }

    pub async fn set_reference_sensor(&self, actuator: &str, sensor: Option<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::SetReferenceSensor {
            actuator: actuator.into(),
            sensor,
            reply,
        };
        self.cmd.send(command).is_ok() && rx.await.unwrap_or(false)
    }

    pub async fn set_analog_calibration(
        &self,
        sensor: &str,
        table: Vec<(String, (f64, f64))>,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::SetAnalogCalibration {
            sensor: sensor.into(),
            table,
            reply,
        };
        self.cmd.send(command).is_ok() && rx.await.unwrap_or(false)
    }

    /// Replace an actuator's controller. Unlike the pairing mutations this
    /// takes effect immediately; an equal configuration is a no-op.
    pub async fn set_control_config(
        &self,
        actuator: &str,
        config: &ControlConfig,
    ) -> Result<(), ControlError> {
        let shared = self.state.lock().unwrap().actuators.get(actuator).cloned();
        match shared {
            Some(a) => a.lock().await.set_control_config(config),
            None => Err(ControlError::InvalidConfig(format!(
                "unknown actuator {actuator}"
            ))),
        }
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().sensor_ids().to_vec()
    }

    pub fn fast_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().fast_ids().to_vec()
    }

    pub fn pairings_for(&self, sensor: &str) -> Vec<(String, usize)> {
        self.state.lock().unwrap().pairings_for(sensor)
    }

    pub fn actuator(&self, id: &str) -> Option<SharedActuator> {
        self.state.lock().unwrap().actuators.get(id).cloned()
    }

    pub fn status(&self) -> ReactorStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: ReactorStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RandomActuator;
    use crate::data::{Channel, ChannelAddress, PhysicalInfo};
    use crate::sensor::RandomSensor;

    fn sensor_info() -> PhysicalInfo {
        PhysicalInfo::new_sampled(
            "random",
            0,
            0.01,
            Transport::Digital,
            vec![Channel::new("pH", "pH", ChannelAddress::None)],
        )
        .unwrap()
    }

    fn actuator_info(transport: Transport) -> PhysicalInfo {
        PhysicalInfo::new(
            "actuator",
            0,
            0.0,
            transport,
            vec![Channel::new("analog", "pump", ChannelAddress::Pin("Q0.5".into()))],
        )
        .unwrap()
    }

    fn state_with(actuators: &[(&str, Transport)], sensors: &[&str]) -> ReactorState {
        let timer = SharedTimer::new(1.0);
        let mut state = ReactorState::default();
        state.sensor_ids = sensors.iter().map(|s| s.to_string()).collect();
        for (id, transport) in actuators {
            let shared = SharedActuator::new(RandomActuator::new(
                id,
                actuator_info(*transport),
                timer.clone(),
            ));
            if *transport == Transport::Pwm {
                state.fast.push(shared.id().to_string());
            }
            state.actuators.insert(shared).unwrap();
        }
        state
    }

    #[test]
    fn pairing_conflict_returns_error_without_mutation() {
        let mut state = state_with(&[("pump_0", Transport::Pwm)], &["ph_0", "do_0"]);

        state.set_pairing("ph_0", "pump_0", 0).unwrap();
        let err = state.set_pairing("do_0", "pump_0", 0).unwrap_err();
        assert!(matches!(err, PairingError::Conflict(_)));

        assert_eq!(state.pairings_for("ph_0"), [("pump_0".to_string(), 0)]);
        assert!(state.pairings_for("do_0").is_empty());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut state = state_with(&[("pump_0", Transport::Pwm)], &["ph_0"]);
        assert!(matches!(
            state.set_pairing("nope", "pump_0", 0),
            Err(PairingError::UnknownId(_))
        ));
        assert!(matches!(
            state.set_pairing("ph_0", "nope", 0),
            Err(PairingError::UnknownId(_))
        ));
        assert!(matches!(
            state.unpair("ph_0", "pump_0", 0),
            Err(PairingError::NotPaired { .. })
        ));
    }

    #[test]
    fn pairing_moves_pwm_actuators_between_partitions() {
        let mut state = state_with(
            &[("pump_0", Transport::Pwm), ("mfc_0", Transport::Digital)],
            &["ph_0"],
        );
        assert_eq!(state.fast_ids(), ["pump_0"]);

        state.set_pairing("ph_0", "pump_0", 0).unwrap();
        assert!(state.fast_ids().is_empty());

        state.unpair("ph_0", "pump_0", 0).unwrap();
        assert_eq!(state.fast_ids(), ["pump_0"]);

        // A digital actuator never enters the fast partition
        state.set_pairing("ph_0", "mfc_0", 1).unwrap();
        state.unpair("ph_0", "mfc_0", 1).unwrap();
        assert_eq!(state.fast_ids(), ["pump_0"]);
    }

    #[test]
    fn pair_unpair_pair_round_trips() {
        let mut state = state_with(&[("pump_0", Transport::Pwm)], &["ph_0"]);

        state.set_pairing("ph_0", "pump_0", 0).unwrap();
        let first = state.pairings_for("ph_0");

        state.unpair("ph_0", "pump_0", 0).unwrap();
        state.set_pairing("ph_0", "pump_0", 0).unwrap();
        assert_eq!(state.pairings_for("ph_0"), first);
        assert!(state.fast_ids().is_empty());
    }

    #[tokio::test]
    async fn reactor_rejects_duplicate_ids() {
        let base = SharedTimer::new(1.0);
        let sensors = vec![
            Sensor::Random(RandomSensor::new("ph_0", sensor_info())),
            Sensor::Random(RandomSensor::new("ph_0", sensor_info())),
        ];
        let result = Reactor::new("R0", 5.0, 1.0, base, sensors, Vec::new(), ValueCache::new());
        assert!(result.is_err());
    }
}
