//! Fetch Scheduler
//!
//! Triggers a fetch cycle on start and then on every interval tick. Cycles run
//! as tracked tasks so that [`Service::stop`] can wait for all of them.
//!
//! # Example
//!
//! ```no_run
//! use opkcat::scheduler::{FetchScheduler, Service};
//! use opkcat::pool::FetchPool;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(pool: Arc<FetchPool>) -> opkcat::Result<()> {
//! let scheduler = FetchScheduler::new(pool, Duration::from_secs(12 * 60 * 60), false);
//! scheduler.start(CancellationToken::new()).await?;
//! // ... until shutdown is requested
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::pool::FetchPool;
use crate::types::Event;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Capacity of the trigger queue; triggers beyond it are dropped
const TRIGGER_QUEUE_CAPACITY: usize = 8;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a long-running component
#[async_trait]
pub trait Service: Send + Sync {
    /// Start background work; `shutdown` is cancelled when the service stops
    async fn start(&self, shutdown: CancellationToken) -> Result<()>;

    /// Stop background work and return once all of it has exited
    async fn stop(&self) -> Result<()>;
}

/// Lifecycle state of a [`FetchScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, not started
    Idle,
    /// Accepting triggers and running cycles
    Running,
    /// Waiting for in-flight cycles to exit
    Stopping,
    /// Terminal
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Handles that exist only while running
struct RunHandles {
    shutdown: CancellationToken,
    trigger_tx: mpsc::Sender<()>,
    loop_handle: JoinHandle<()>,
}

/// Periodic driver of [`FetchPool`] cycles
pub struct FetchScheduler {
    pool: Arc<FetchPool>,
    interval: Duration,
    allow_overlap: bool,
    state: Arc<std::sync::Mutex<SchedulerState>>,
    handles: Mutex<Option<RunHandles>>,
    tracker: TaskTracker,
    cycles: Arc<AtomicU64>,
    event_tx: broadcast::Sender<Event>,
}

impl FetchScheduler {
    /// Create an idle scheduler
    ///
    /// When `allow_overlap` is false, a trigger that arrives while a cycle is
    /// still running is dropped instead of starting a second cycle.
    pub fn new(pool: Arc<FetchPool>, interval: Duration, allow_overlap: bool) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pool,
            interval,
            allow_overlap,
            state: Arc::new(std::sync::Mutex::new(SchedulerState::Idle)),
            handles: Mutex::new(None),
            tracker: TaskTracker::new(),
            cycles: Arc::new(AtomicU64::new(0)),
            event_tx,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        *lock_state(&self.state)
    }

    fn set_state(&self, state: SchedulerState) {
        *lock_state(&self.state) = state;
        debug!(%state, "Scheduler state changed");
    }

    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Number of cycle tasks currently running
    pub fn active_cycles(&self) -> usize {
        self.tracker.len()
    }

    /// Request one extra cycle outside the regular interval
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the scheduler is running, which
    /// includes the window after the shutdown token was cancelled by its owner.
    pub async fn trigger(&self) -> Result<()> {
        let handles = self.handles.lock().await;
        let rejected = |state: SchedulerState| Error::InvalidState {
            operation: "trigger",
            state: state.to_string(),
        };

        let run = match handles.as_ref() {
            Some(run) if self.state() == SchedulerState::Running => run,
            _ => return Err(rejected(self.state())),
        };
        if run.shutdown.is_cancelled() {
            return Err(rejected(SchedulerState::Stopping));
        }
        match run.trigger_tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => {
                debug!("Trigger queue full, dropping trigger");
                Ok(())
            }
            Err(TrySendError::Closed(())) => Err(rejected(SchedulerState::Stopping)),
        }
    }
}

fn lock_state(
    state: &std::sync::Mutex<SchedulerState>,
) -> std::sync::MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// State shared between the scheduler and its trigger loop
struct LoopContext {
    pool: Arc<FetchPool>,
    interval: Duration,
    allow_overlap: bool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    cycles: Arc<AtomicU64>,
    event_tx: broadcast::Sender<Event>,
    state: Arc<std::sync::Mutex<SchedulerState>>,
}

impl LoopContext {
    /// Consume triggers until shutdown, spawning one cycle per trigger
    async fn run_loop(
        self: Arc<Self>,
        mut trigger_rx: mpsc::Receiver<()>,
        trigger_tx: mpsc::Sender<()>,
    ) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Fetch interval elapsed");
                    if trigger_tx.try_send(()).is_err() {
                        debug!("Trigger queue full, dropping tick");
                    }
                }
                Some(()) = trigger_rx.recv() => self.spawn_cycle(),
            }
        }

        // Stop accepting triggers and discard anything still queued
        drop(trigger_tx);
        trigger_rx.close();
        let mut discarded = 0;
        while trigger_rx.try_recv().is_ok() {
            discarded += 1;
        }
        debug!(discarded, "Trigger loop exited");

        // Cancelled by the token's owner rather than by stop()
        let mut state = lock_state(&self.state);
        if *state == SchedulerState::Running {
            *state = SchedulerState::Stopping;
            info!("Shutdown requested, fetch scheduler no longer accepts triggers");
        }
    }

    fn spawn_cycle(&self) {
        if !self.allow_overlap && !self.tracker.is_empty() {
            info!("Fetch cycle already running, coalescing trigger");
            let _ = self.event_tx.send(Event::TriggerCoalesced);
            return;
        }

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = self.pool.clone();
        let shutdown = self.shutdown.clone();
        let event_tx = self.event_tx.clone();

        self.tracker.spawn(async move {
            info!(cycle, "Fetch cycle started");
            let _ = event_tx.send(Event::CycleStarted { cycle });

            match pool.run_cycle(cycle, &shutdown).await {
                Ok(report) => {
                    let _ = event_tx.send(Event::CycleFinished(report));
                }
                Err(e) => {
                    error!(cycle, error = %e, "Fetch cycle failed");
                    let _ = event_tx.send(Event::CycleFailed {
                        cycle,
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}

#[async_trait]
impl Service for FetchScheduler {
    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let mut handles = self.handles.lock().await;
        let state = self.state();
        if state != SchedulerState::Idle {
            return Err(Error::InvalidState {
                operation: "start",
                state: state.to_string(),
            });
        }

        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        // The first cycle runs right away
        let _ = trigger_tx.try_send(());

        let context = Arc::new(LoopContext {
            pool: self.pool.clone(),
            interval: self.interval,
            allow_overlap: self.allow_overlap,
            shutdown: shutdown.clone(),
            tracker: self.tracker.clone(),
            cycles: self.cycles.clone(),
            event_tx: self.event_tx.clone(),
            state: self.state.clone(),
        });
        self.set_state(SchedulerState::Running);
        let loop_handle = tokio::spawn(LoopContext::run_loop(
            context,
            trigger_rx,
            trigger_tx.clone(),
        ));

        *handles = Some(RunHandles {
            shutdown,
            trigger_tx,
            loop_handle,
        });
        info!(interval_secs = self.interval.as_secs(), "Fetch scheduler started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        match self.state() {
            SchedulerState::Running => {}
            // Shutdown token cancelled elsewhere; finish the job
            SchedulerState::Stopping if handles.is_some() => {}
            SchedulerState::Stopped => return Ok(()),
            state => {
                return Err(Error::InvalidState {
                    operation: "stop",
                    state: state.to_string(),
                });
            }
        }

        self.set_state(SchedulerState::Stopping);
        info!("Stopping fetch scheduler");

        if let Some(run) = handles.take() {
            run.shutdown.cancel();
            drop(run.trigger_tx);
            if let Err(e) = run.loop_handle.await {
                error!(error = %e, "Trigger loop panicked");
            }
        }

        self.tracker.close();
        debug!(active = self.tracker.len(), "Waiting for fetch cycles to exit");
        self.tracker.wait().await;

        self.set_state(SchedulerState::Stopped);
        let _ = self.event_tx.send(Event::Stopped);
        info!("Fetch scheduler stopped");
        Ok(())
    }
}
