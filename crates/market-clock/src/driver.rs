//! Background task that advances simulated time.
//!
//! The driver owns two tokio tasks: a ticker that advances the shared [`Clock`]
//! on a fixed wall-clock interval, and a writer that persists the most recent
//! snapshot through a [`ClockStore`]. The ticker only publishes snapshots into a
//! `watch` channel, so a slow store can never delay a tick.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::{Clock, ClockMode, ClockState};
use crate::error::ClockError;
use crate::store::ClockStore;

/// Driver tuning
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Wall-clock interval between advances
    pub tick: Duration,
    /// Persist every N advancing ticks (explicit transitions always persist)
    pub persist_every_ticks: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            persist_every_ticks: 5,
        }
    }
}

/// Latest-value channel feeding the writer task.
struct StatePublisher {
    tx: Mutex<Option<watch::Sender<ClockState>>>,
}

impl StatePublisher {
    fn publish(&self, state: ClockState) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            tx.send_replace(state);
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Handle to the running clock driver
pub struct ClockDriver {
    clock: Clock,
    publisher: Arc<StatePublisher>,
    shutdown_tx: watch::Sender<bool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl ClockDriver {
    /// Spawn the driver tasks on the current tokio runtime.
    pub fn spawn(clock: Clock, store: Option<Arc<dyn ClockStore>>, config: DriverConfig) -> Self {
        let tick = if config.tick.is_zero() {
            tracing::warn!("Clock tick of 0 requested, using 1s");
            Duration::from_secs(1)
        } else {
            config.tick
        };
        let persist_every = config.persist_every_ticks.max(1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (writer, publisher) = match store {
            Some(store) => {
                let (tx, rx) = watch::channel(clock.snapshot());
                let handle = tokio::spawn(run_writer(store, rx));
                (
                    Some(handle),
                    StatePublisher {
                        tx: Mutex::new(Some(tx)),
                    },
                )
            }
            None => (
                None,
                StatePublisher {
                    tx: Mutex::new(None),
                },
            ),
        };
        let publisher = Arc::new(publisher);

        let ticker = tokio::spawn(run_ticker(
            clock.clone(),
            tick,
            persist_every,
            Arc::clone(&publisher),
            shutdown_rx,
        ));

        tracing::info!(
            "Clock driver started (tick {:?}, mode {}, speed {}x)",
            tick,
            clock.mode(),
            clock.speed()
        );

        Self {
            clock,
            publisher,
            shutdown_tx,
            ticker: Mutex::new(Some(ticker)),
            writer: Mutex::new(writer),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    fn persist(&self) {
        self.publisher.publish(self.clock.snapshot());
    }

    /// Resume advancing simulated time. Idempotent.
    pub fn start(&self) -> bool {
        let changed = self.clock.set_running(true);
        if changed {
            tracing::info!("Clock started at {}", self.clock.simulated_time().to_rfc3339());
            self.persist();
        }
        changed
    }

    /// Freeze simulated time. Idempotent.
    pub fn pause(&self) -> bool {
        let changed = self.clock.set_running(false);
        if changed {
            tracing::info!("Clock paused at {}", self.clock.simulated_time().to_rfc3339());
            self.persist();
        }
        changed
    }

    /// Stop and rewind simulated time to the configured start. Idempotent.
    pub fn reset(&self) -> bool {
        let changed = self.clock.rewind();
        if changed {
            tracing::info!("Clock reset to {}", self.clock.sim_start().to_rfc3339());
            self.persist();
        }
        changed
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), ClockError> {
        if self.clock.set_speed(speed)? {
            tracing::info!("Clock speed set to {}x", speed);
            self.persist();
        }
        Ok(())
    }

    pub fn set_mode(&self, mode: ClockMode) {
        if self.clock.set_mode(mode) {
            tracing::info!("Clock mode set to {}", mode);
            self.persist();
        }
    }

    pub fn set_time(&self, time: DateTime<Utc>) -> Result<(), ClockError> {
        self.clock.set_time(time)?;
        tracing::info!("Simulated time set to {}", time.to_rfc3339());
        self.persist();
        Ok(())
    }

    pub fn configure_start(&self, start: DateTime<Utc>) -> Result<(), ClockError> {
        self.clock.configure_start(start)?;
        tracing::info!("Simulation start set to {}", start.to_rfc3339());
        self.persist();
        Ok(())
    }

    /// Stop ticking, flush the final state to the store, and wait for both tasks.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = ticker {
            if let Err(e) = handle.await {
                tracing::warn!("Clock ticker ended abnormally: {}", e);
            }
        }

        self.persist();
        self.publisher.close();

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                tracing::warn!("Clock writer ended abnormally: {}", e);
            }
        }
        tracing::info!("Clock driver stopped");
    }
}

async fn run_ticker(
    clock: Clock,
    tick: Duration,
    persist_every: u32,
    publisher: Arc<StatePublisher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut since_persist = 0u32;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(now) = clock.advance(tick) {
                    tracing::trace!("Simulated time advanced to {}", now.to_rfc3339());
                    since_persist += 1;
                    if since_persist >= persist_every {
                        publisher.publish(clock.snapshot());
                        since_persist = 0;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_writer(store: Arc<dyn ClockStore>, mut rx: watch::Receiver<ClockState>) {
    // Drains the newest unseen value even after the sender is dropped.
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if let Err(e) = store.save_clock(&state).await {
            tracing::warn!("Failed to persist clock state: {}", e);
        }
    }
}
