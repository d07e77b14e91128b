//! Change-gated mirror of every observed value toward the persistence
//! layer. The scheduler pushes after each tick; only values that actually
//! changed fan out to the followers, and a follower that stopped listening
//! is cleaned up on the next broadcast.

use std::time::SystemTime;

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use dashmap::DashMap;
use log::{error, info, trace};

/// One observed change, carrying what the persistence contract needs: the
/// model string selects the destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    pub reactor: String,
    pub entity: String,
    pub model: String,
    pub units: String,
    pub value: f64,
    pub calibration: Option<String>,
}

impl ValueUpdate {
    fn key(&self) -> String {
        format!("{}/{}:{}", self.reactor, self.entity, self.units)
    }
}

/// Experiment record created up front in the relational store.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub name: String,
    pub date: SystemTime,
    /// Comma-separated reactor ids
    pub reactors: String,
    pub volume: f64,
}

/// The consumed persistence contract. Implementations write to the
/// relational store; the core only ever logs their failures.
pub trait DataSink: Send {
    fn create_experiment(&mut self, experiment: &Experiment) -> Result<()>;

    fn store_data(
        &mut self,
        update: &ValueUpdate,
        experiment: &str,
        timestamp: SystemTime,
    ) -> Result<()>;
}

/// Sink of last resort: logs what would have been stored.
#[derive(Debug, Default)]
pub struct LogSink;

impl DataSink for LogSink {
    fn create_experiment(&mut self, experiment: &Experiment) -> Result<()> {
        info!("experiment {:?} on reactors {}", experiment.name, experiment.reactors);
        Ok(())
    }

    fn store_data(&mut self, update: &ValueUpdate, experiment: &str, _: SystemTime) -> Result<()> {
        info!(
            "[{}] {}/{} = {} {}",
            experiment, update.reactor, update.entity, update.value, update.units
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    values: DashMap<String, f64>,
    followers: std::sync::Mutex<Vec<Sender<ValueUpdate>>>,
}

/// Latest-value store with subscriber fan-out.
#[derive(Debug, Clone, Default)]
pub struct ValueCache(std::sync::Arc<CacheInner>);

impl ValueCache {
    pub fn new() -> ValueCache {
        ValueCache::default()
    }

    /// Record an observation. Followers only hear about changes.
    pub fn push(&self, update: ValueUpdate) {
        let key = update.key();
        let changed = self.0.values.get(&key).map(|v| *v) != Some(update.value);
        if !changed {
            return;
        }
        trace!("{} = {}", key, update.value);
        self.0.values.insert(key, update.value);
        self.broadcast(update);
    }

    pub fn get(&self, reactor: &str, entity: &str, units: &str) -> Option<f64> {
        self.0
            .values
            .get(&format!("{reactor}/{entity}:{units}"))
            .map(|v| *v)
    }

    pub fn subscribe(&self) -> Receiver<ValueUpdate> {
        let (tx, rx) = crossbeam_channel::bounded(64);
        self.0.followers.lock().unwrap().push(tx);
        rx
    }

    fn broadcast(&self, update: ValueUpdate) {
        let mut followers = self.0.followers.lock().unwrap();
        followers.retain(|chan| {
            match chan.try_send(update.clone()) {
                Err(TrySendError::Disconnected(_)) => {
                    info!("cleaning up disconnected follower");
                    false
                }
                // A full follower loses this update; data loss is preferred
                // to stalling control
                _ => true,
            }
        });
    }
}

/// Handle to the running persistence-mirror thread.
///
/// The thread drains cache updates until every `ValueCache` clone is gone,
/// so the worker joins on drop to flush the tail of an experiment before
/// the process exits. A mirror that died early is reported against its
/// experiment and otherwise swallowed, in line with the data-loss-over-
/// control-interruption policy.
#[derive(Debug)]
pub struct MirrorWorker {
    experiment: String,
    handle: Option<std::thread::JoinHandle<Result<()>>>,
}

impl MirrorWorker {
    /// Join now instead of at drop time.
    pub fn join(mut self) -> Result<()> {
        self.take_result()
    }

    fn take_result(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(inner) => inner
                .join()
                .map_err(|e| anyhow!("mirror thread panicked: {:?}", e))
                .and_then(|r| r),
            None => Ok(()),
        }
    }
}

impl Drop for MirrorWorker {
    fn drop(&mut self) {
        if let Err(e) = self.take_result() {
            if !std::thread::panicking() {
                error!("experiment {:?}: persistence mirror died: {}", self.experiment, e);
            }
        }
    }
}

/// Pump cache changes into the persistence sink on a dedicated thread.
/// Sink errors are logged and swallowed.
pub fn spawn_mirror(
    cache: &ValueCache,
    mut sink: Box<dyn DataSink>,
    experiment: Experiment,
) -> Result<MirrorWorker> {
    let rx = cache.subscribe();
    let name = experiment.name.clone();
    let handle = std::thread::Builder::new()
        .name("data-mirror".into())
        .spawn(move || {
            if let Err(e) = sink.create_experiment(&experiment) {
                error!("could not create experiment {:?}: {}", experiment.name, e);
            }
            for update in rx {
                if let Err(e) = sink.store_data(&update, &experiment.name, SystemTime::now()) {
                    error!("store_data failed for {}/{}: {}", update.reactor, update.entity, e);
                }
            }
            Ok(())
        })?;
    Ok(MirrorWorker {
        experiment: name,
        handle: Some(handle),
    })
}
