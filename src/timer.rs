use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, error};

/// Subscriber groups, notified in this order on every firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberClass {
    Sensor,
    Actuator,
    Generic,
}

const CLASS_ORDER: [SubscriberClass; 3] = [
    SubscriberClass::Sensor,
    SubscriberClass::Actuator,
    SubscriberClass::Generic,
];

/// One-shot flag raised when the timer the owner subscribed to fires.
///
/// The subscriber keeps this end, the timer keeps the other. Checking the
/// flag consumes it.
#[derive(Debug, Clone)]
pub struct SamplingEvent(Arc<AtomicBool>);

impl SamplingEvent {
    fn new() -> SamplingEvent {
        SamplingEvent(Arc::new(AtomicBool::new(false)))
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Generational handle into a timer's subscriber arena. Revoking the token
/// detaches the subscriber without the timer ever holding a reference back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberToken {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    class: SubscriberClass,
    // None marks a free slot
    flag: Option<Arc<AtomicBool>>,
}

/// A periodic notifier.
///
/// `tick` fires when more than `interval` seconds elapsed since the last
/// firing, advances the firing instant and raises every subscriber flag in
/// class order. The async variant keeps its own firing instant so sync and
/// async consumers do not steal each other's events.
#[derive(Debug)]
pub struct Timer {
    interval: f64,
    last_fire: Instant,
    as_last_fire: Instant,
    elapsed: f64,
    slots: Vec<Slot>,
    generation: u64,
}

impl Timer {
    pub fn new(interval: f64) -> Timer {
        let now = Instant::now();
        Timer {
            interval,
            last_fire: now,
            as_last_fire: now,
            elapsed: 0.0,
            slots: Vec::new(),
            generation: 0,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Elapsed seconds computed on the most recent tick. Consumers such as
    /// the PID law use this as the effective sample period.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Change the interval. The firing instants reset to now, so the next
    /// fire is one full new interval away.
    pub fn set_interval(&mut self, interval: f64) {
        self.set_interval_at(interval, Instant::now());
    }

    pub(crate) fn set_interval_at(&mut self, interval: f64, now: Instant) {
        self.interval = interval;
        self.last_fire = now;
        self.as_last_fire = now;
    }

    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub(crate) fn tick_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_fire).as_secs_f64();
        self.elapsed = elapsed;
        if elapsed > self.interval {
            self.last_fire = now;
            self.notify();
            return true;
        }
        false
    }

    pub fn async_tick(&mut self) -> bool {
        self.async_tick_at(Instant::now())
    }

    pub(crate) fn async_tick_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.as_last_fire).as_secs_f64();
        self.elapsed = elapsed;
        if elapsed > self.interval {
            self.as_last_fire = now;
            self.notify();
            return true;
        }
        false
    }

    fn notify(&self) {
        for class in CLASS_ORDER {
            for slot in &self.slots {
                if slot.class == class {
                    if let Some(flag) = &slot.flag {
                        flag.store(true, Ordering::Release);
                    }
                }
            }
        }
    }

    pub fn subscribe(&mut self, class: SubscriberClass) -> (SubscriberToken, SamplingEvent) {
        let event = SamplingEvent::new();
        self.generation += 1;
        let slot = Slot {
            generation: self.generation,
            class,
            flag: Some(event.0.clone()),
        };
        let index = match self.slots.iter().position(|s| s.flag.is_none()) {
            Some(free) => {
                self.slots[free] = slot;
                free
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        debug!("timer {:.3}s: subscriber {:?} on slot {}", self.interval, class, index);
        (
            SubscriberToken {
                slot: index,
                generation: self.generation,
            },
            event,
        )
    }

    /// Idempotent: revoking a token that is not subscribed is logged and
    /// otherwise ignored.
    pub fn unsubscribe(&mut self, token: SubscriberToken) {
        match self.slots.get_mut(token.slot) {
            Some(slot) if slot.flag.is_some() && slot.generation == token.generation => {
                slot.flag = None;
            }
            _ => {
                error!("timer {:.3}s: token {:?} is not subscribed", self.interval, token);
            }
        }
    }
}

/// Cheap clonable handle to a [`Timer`] shared between a sensor and the
/// actuators recomputing on its cadence. The inner lock is only ever held
/// for the duration of a single call.
#[derive(Debug, Clone)]
pub struct SharedTimer(Arc<Mutex<Timer>>);

impl SharedTimer {
    pub fn new(interval: f64) -> SharedTimer {
        SharedTimer(Arc::new(Mutex::new(Timer::new(interval))))
    }

    pub fn tick(&self) -> bool {
        self.0.lock().unwrap().tick()
    }

    pub fn async_tick(&self) -> bool {
        self.0.lock().unwrap().async_tick()
    }

    pub fn interval(&self) -> f64 {
        self.0.lock().unwrap().interval()
    }

    pub fn elapsed(&self) -> f64 {
        self.0.lock().unwrap().elapsed()
    }

    pub fn set_interval(&self, interval: f64) {
        self.0.lock().unwrap().set_interval(interval);
    }

    pub fn subscribe(&self, class: SubscriberClass) -> (SubscriberToken, SamplingEvent) {
        self.0.lock().unwrap().subscribe(class)
    }

    pub fn unsubscribe(&self, token: SubscriberToken) {
        self.0.lock().unwrap().unsubscribe(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(start: Instant, secs: f64) -> Instant {
        start + Duration::from_secs_f64(secs)
    }

    #[test]
    fn fires_once_per_interval() {
        let start = Instant::now();
        let mut timer = Timer::new(1.0);
        let (_token, event) = timer.subscribe(SubscriberClass::Generic);

        // Two ticks inside the interval fire nothing
        assert!(!timer.tick_at(at(start, 0.3)));
        assert!(!timer.tick_at(at(start, 0.9)));
        assert!(!event.is_raised());

        assert!(timer.tick_at(at(start, 1.2)));
        assert!(event.take());
        assert!(!event.take());

        // The firing instant advanced, so the next window starts at 1.2
        assert!(!timer.tick_at(at(start, 2.1)));
        assert!(timer.tick_at(at(start, 2.3)));
    }

    #[test]
    fn elapsed_is_stored_every_tick() {
        let start = Instant::now();
        let mut timer = Timer::new(5.0);
        timer.tick_at(at(start, 2.0));
        assert!((timer.elapsed() - 2.0).abs() < 1e-9);
        timer.tick_at(at(start, 6.0));
        assert!((timer.elapsed() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn interval_change_resets_the_window() {
        let start = Instant::now();
        let mut timer = Timer::new(1.0);
        timer.set_interval_at(3.0, at(start, 0.9));
        assert!(!timer.tick_at(at(start, 2.0)));
        assert!(timer.tick_at(at(start, 4.0)));
    }

    #[test]
    fn sync_and_async_instants_are_independent() {
        let start = Instant::now();
        let mut timer = Timer::new(1.0);
        assert!(timer.tick_at(at(start, 1.5)));
        // The async side has its own window and still fires
        assert!(timer.async_tick_at(at(start, 1.6)));
    }

    #[test]
    fn revoked_token_stops_events_and_remove_is_idempotent() {
        let mut timer = Timer::new(0.0);
        let (token, event) = timer.subscribe(SubscriberClass::Actuator);
        timer.unsubscribe(token);
        timer.notify();
        assert!(!event.is_raised());
        // Second revoke logs and continues
        timer.unsubscribe(token);
    }

    #[test]
    fn stale_generation_does_not_revoke_new_subscriber() {
        let mut timer = Timer::new(0.0);
        let (old, _event) = timer.subscribe(SubscriberClass::Generic);
        timer.unsubscribe(old);
        let (_new, event) = timer.subscribe(SubscriberClass::Generic);
        // The old token points at the reused slot but has a stale generation
        timer.unsubscribe(old);
        timer.notify();
        assert!(event.is_raised());
    }
}
