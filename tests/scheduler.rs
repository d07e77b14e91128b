//! End-to-end runs of the dual-rate scheduler on random transducers.

use std::time::Duration;

use tokio::sync::watch;

use biocontrol::actuator::{Actuator, RandomActuator};
use biocontrol::data::{Channel, ChannelAddress, ControlConfig, PhysicalInfo, Transport};
use biocontrol::mirror::ValueCache;
use biocontrol::reactor::{Reactor, ReactorHandle, ReactorStatus};
use biocontrol::sensor::{RandomSensor, Sensor};
use biocontrol::timer::SharedTimer;

const PERIOD: f64 = 0.05;

fn probe(id: &str) -> Sensor {
    let info = PhysicalInfo::new_sampled(
        "random",
        0,
        0.02,
        Transport::Digital,
        vec![Channel::new("pH", "pH", ChannelAddress::None)],
    )
    .unwrap();
    Sensor::Random(RandomSensor::new(id, info))
}

fn pump(id: &str, transport: Transport, base: SharedTimer) -> Actuator {
    let info = PhysicalInfo::new(
        "actuator",
        0,
        0.0,
        transport,
        vec![Channel::new("analog", "pump", ChannelAddress::Pin("Q0.5".into()))],
    )
    .unwrap();
    RandomActuator::new(id, info, base)
}

/// Build an idle reactor; controllers are configured through the handle
/// before the loops start.
fn build(
    sensors: Vec<&str>,
    actuators: Vec<(&str, Transport)>,
) -> (Reactor, ReactorHandle, ValueCache) {
    let cache = ValueCache::new();
    let base = SharedTimer::new(PERIOD);
    let sensors = sensors.into_iter().map(probe).collect();
    let actuators = actuators
        .into_iter()
        .map(|(id, transport)| pump(id, transport, base.clone()))
        .collect();
    let reactor = Reactor::new("R0", 5.0, PERIOD, base, sensors, actuators, cache.clone()).unwrap();
    let handle = reactor.handle();
    (reactor, handle, cache)
}

fn start(reactor: Reactor) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (_, task) = reactor.spawn(shutdown_rx).unwrap();
    (task, shutdown)
}

async fn observe(handle: &ReactorHandle, id: &str) -> (f64, usize) {
    let shared = handle.actuator(id).unwrap();
    let guard = shared.lock().await;
    let writes = match &*guard {
        Actuator::Random(a) => a.writes(),
        _ => unreachable!(),
    };
    (guard.curr_value(), writes)
}

#[tokio::test]
async fn manual_constant_output_writes_once() {
    let (reactor, handle, _cache) = build(vec!["ph_0"], vec![("pump_0", Transport::Pwm)]);
    handle
        .set_control_config("pump_0", &ControlConfig::manual(2000.0))
        .await
        .unwrap();
    let (task, shutdown) = start(reactor);

    assert!(handle.set_pairing("ph_0", "pump_0", 0).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (value, writes) = observe(&handle, "pump_0").await;
    assert_eq!(value, 2000.0);
    assert_eq!(writes, 1);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn fast_loop_reasserts_unpaired_pwm() {
    let (reactor, handle, _cache) = build(vec!["ph_0"], vec![("pump_0", Transport::Pwm)]);
    handle
        .set_control_config("pump_0", &ControlConfig::manual(1500.0))
        .await
        .unwrap();
    let (task, shutdown) = start(reactor);

    tokio::time::sleep(Duration::from_millis(350)).await;

    let (value, writes) = observe(&handle, "pump_0").await;
    assert_eq!(value, 1500.0);
    // Re-asserted every 100ms but gated to one physical write
    assert_eq!(writes, 1);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn unpaired_slow_actuators_are_zeroed() {
    let (reactor, handle, _cache) = build(vec!["ph_0"], vec![("mfc_0", Transport::Digital)]);
    // Even a configured controller does not drive an unbound slow device
    handle
        .set_control_config("mfc_0", &ControlConfig::manual(3000.0))
        .await
        .unwrap();
    let (task, shutdown) = start(reactor);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let (value, _) = observe(&handle, "mfc_0").await;
    assert_eq!(value, 0.0);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn pairing_conflict_leaves_table_unchanged() {
    let (reactor, handle, _cache) = build(
        vec!["ph_0", "do_0"],
        vec![("pump_0", Transport::Pwm)],
    );
    let (task, shutdown) = start(reactor);

    assert!(handle.set_pairing("ph_0", "pump_0", 0).await);
    assert!(!handle.set_pairing("do_0", "pump_0", 0).await);

    assert_eq!(handle.pairings_for("ph_0"), [("pump_0".to_string(), 0)]);
    assert!(handle.pairings_for("do_0").is_empty());

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn pair_unpair_pair_round_trips_through_the_loop() {
    let (reactor, handle, _cache) = build(vec!["ph_0"], vec![("pump_0", Transport::Pwm)]);
    let (task, shutdown) = start(reactor);

    assert!(handle.set_pairing("ph_0", "pump_0", 0).await);
    let first = handle.pairings_for("ph_0");
    assert!(handle.fast_ids().is_empty());

    assert!(handle.unpair("ph_0", "pump_0", 0).await);
    assert_eq!(handle.fast_ids(), ["pump_0"]);

    assert!(handle.set_pairing("ph_0", "pump_0", 0).await);
    assert_eq!(handle.pairings_for("ph_0"), first);
    assert!(handle.fast_ids().is_empty());

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn shutdown_zeroes_every_actuator() {
    let (reactor, handle, _cache) = build(
        vec!["ph_0"],
        vec![("pump_0", Transport::Pwm), ("mfc_0", Transport::Digital)],
    );
    handle
        .set_control_config("pump_0", &ControlConfig::manual(2000.0))
        .await
        .unwrap();
    let (task, shutdown) = start(reactor);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.status(), ReactorStatus::On);

    shutdown.send(true).unwrap();
    task.await.unwrap();

    let (pump_value, _) = observe(&handle, "pump_0").await;
    let (mfc_value, _) = observe(&handle, "mfc_0").await;
    assert_eq!(pump_value, 0.0);
    assert_eq!(mfc_value, 0.0);
    assert_eq!(handle.status(), ReactorStatus::Off);
}

#[tokio::test]
async fn mirror_receives_changed_values() {
    let (reactor, _handle, cache) = build(vec!["ph_0"], vec![("pump_0", Transport::Pwm)]);
    let updates = cache.subscribe();
    let (task, shutdown) = start(reactor);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen: Vec<_> = updates.try_iter().collect();
    assert!(seen.iter().any(|u| u.entity == "ph_0" && u.units == "pH"));
    assert!(seen.iter().any(|u| u.entity == "pump_0"));

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn hysteresis_follows_the_paired_channel() {
    let (reactor, handle, _cache) = build(vec!["ph_0"], vec![("pump_0", Transport::Pwm)]);
    // The random probe sits around 35, far above the band
    handle
        .set_control_config("pump_0", &ControlConfig::on_boundaries(1.0, 2.0, 255.0))
        .await
        .unwrap();
    let (task, shutdown) = start(reactor);

    assert!(handle.set_pairing("ph_0", "pump_0", 0).await);
    assert!(handle.set_reference_sensor("pump_0", Some("ph_0".into())).await);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let (value, _) = observe(&handle, "pump_0").await;
    assert_eq!(value, 0.0);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}
