//! Capture Scheduler
//!
//! Drives detection cycles at the configured interval.
//!
//! States: `Idle -> Armed -> Running -> (Idle | Stopped)`.
//! - A tokio driver task sleeps for the snapshot interval, racing a
//!   shutdown channel, then hands the cycle to the blocking pool.
//! - At most one cycle is in flight. A tick that finds one running is
//!   dropped and counted, never queued.
//! - `stop()` waits up to the grace period for the in-flight cycle, then
//!   releases the context whether or not it finished.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::context::PipelineContext;
use super::cycle::{run_cycle, CycleOutcome, CycleReport};
use crate::constants::DEFAULT_STOP_GRACE_MS;

const IN_FLIGHT_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// No driver; context may or may not be held
    Idle,
    /// Context held, driver not started
    Armed,
    Running,
    /// Terminal; context released
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is not armed")]
    NotArmed,

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is stopped")]
    Stopped,

    #[error("no tokio runtime available")]
    NoRuntime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub cycles_started: u64,
    pub recorded: u64,
    pub discarded: u64,
    /// Cycles that failed (capture, classifier or store)
    pub failed: u64,
    /// Ticks dropped because a cycle was still in flight
    pub dropped_ticks: u64,
}

// ============================================================================
// SHARED STATE
// ============================================================================

/// State shared between the handle, the driver task and running cycles
struct Shared {
    in_flight: AtomicBool,
    ticks: AtomicU64,
    cycles_started: AtomicU64,
    recorded: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
    dropped_ticks: AtomicU64,
    reports: watch::Sender<Option<CycleReport>>,
}

impl Shared {
    fn new() -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            in_flight: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            cycles_started: AtomicU64::new(0),
            recorded: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped_ticks: AtomicU64::new(0),
            reports,
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks.load(Ordering::SeqCst),
            cycles_started: self.cycles_started.load(Ordering::SeqCst),
            recorded: self.recorded.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dropped_ticks: self.dropped_ticks.load(Ordering::SeqCst),
        }
    }

    fn complete(&self, cycle: u64, started: Instant, outcome: CycleOutcome) {
        match &outcome {
            CycleOutcome::Recorded { .. } => self.recorded.fetch_add(1, Ordering::SeqCst),
            CycleOutcome::Discarded { .. } => self.discarded.fetch_add(1, Ordering::SeqCst),
            CycleOutcome::Failed { .. } => self.failed.fetch_add(1, Ordering::SeqCst),
        };

        self.reports.send_replace(Some(CycleReport {
            cycle,
            finished_at: chrono::Utc::now().timestamp_millis(),
            duration_ms: started.elapsed().as_millis() as u64,
            outcome,
        }));
    }
}

/// Holds the in-flight flag; clears it on drop, including unwinds
struct InFlightGuard(Arc<Shared>);

impl InFlightGuard {
    fn acquire(shared: &Arc<Shared>) -> Option<Self> {
        shared
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(shared.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

struct Driver {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    state: SchedulerState,
    context: Option<Arc<PipelineContext>>,
    driver: Option<Driver>,
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct Scheduler {
    inner: Mutex<Inner>,
    shared: Arc<Shared>,
    grace: Duration,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_grace(Duration::from_millis(DEFAULT_STOP_GRACE_MS))
    }

    /// Custom wait for the in-flight cycle on `stop()`
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { state: SchedulerState::Idle, context: None, driver: None }),
            shared: Arc::new(Shared::new()),
            grace,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    pub fn is_cycle_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Completion signal: the latest `CycleReport`, updated after every cycle
    pub fn subscribe(&self) -> watch::Receiver<Option<CycleReport>> {
        self.shared.reports.subscribe()
    }

    /// Hand the scheduler its context. `Idle -> Armed`.
    pub fn arm(&self, context: PipelineContext) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
            SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
            SchedulerState::Idle | SchedulerState::Armed => {}
        }

        if let Some(previous) = inner.context.replace(Arc::new(context)) {
            previous.release();
        }
        inner.state = SchedulerState::Armed;
        log::info!("[Scheduler] Armed");
        Ok(())
    }

    /// Start the driver. Valid from `Armed`, or `Idle` after a pause.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
            SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
            SchedulerState::Idle | SchedulerState::Armed => {}
        }

        let context = inner.context.clone().ok_or(SchedulerError::NotArmed)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(drive(context, self.shared.clone(), shutdown_rx));

        inner.driver = Some(Driver { handle, shutdown });
        inner.state = SchedulerState::Running;
        log::info!("[Scheduler] Running");
        Ok(())
    }

    /// Stop the driver, keep the context. `Running -> Idle`.
    /// An in-flight cycle finishes on its own.
    pub async fn pause(&self) {
        let driver = {
            let mut inner = self.inner.lock();
            if inner.state != SchedulerState::Running {
                return;
            }
            inner.state = SchedulerState::Idle;
            inner.driver.take()
        };

        if let Some(driver) = driver {
            stop_driver(driver).await;
        }
        log::info!("[Scheduler] Paused");
    }

    /// Terminal stop. No new cycle starts after this is called; the
    /// in-flight cycle gets the grace period, then the context is released.
    pub async fn stop(&self) {
        let (driver, context) = {
            let mut inner = self.inner.lock();
            if inner.state == SchedulerState::Stopped {
                return;
            }
            inner.state = SchedulerState::Stopped;
            (inner.driver.take(), inner.context.take())
        };

        if let Some(driver) = driver {
            stop_driver(driver).await;
        }

        let finished = tokio::time::timeout(self.grace, async {
            while self.shared.in_flight.load(Ordering::SeqCst) {
                tokio::time::sleep(IN_FLIGHT_POLL).await;
            }
        })
        .await
        .is_ok();

        if !finished {
            log::warn!("[Scheduler] In-flight cycle exceeded {:?} grace period, abandoning it", self.grace);
        }

        if let Some(context) = context {
            context.release();
        }

        let stats = self.shared.stats();
        log::info!(
            "[Scheduler] Stopped ({} cycles, {} recorded, {} failed, {} dropped ticks)",
            stats.cycles_started,
            stats.recorded,
            stats.failed,
            stats.dropped_ticks
        );
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(driver) = inner.driver.take() {
            driver.shutdown.send_replace(true);
            driver.handle.abort();
        }
        if let Some(context) = inner.context.take() {
            context.release();
        }
        inner.state = SchedulerState::Stopped;
    }
}

async fn stop_driver(driver: Driver) {
    driver.shutdown.send_replace(true);
    if let Err(e) = driver.handle.await {
        if !e.is_cancelled() {
            log::error!("[Scheduler] Driver task failed: {}", e);
        }
    }
}

// ============================================================================
// DRIVER
// ============================================================================

async fn drive(context: Arc<PipelineContext>, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    log::debug!("[Scheduler] Driver started");

    loop {
        // Interval re-read at the start of every idle period
        let interval = context.config.snapshot().capture_interval();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        shared.ticks.fetch_add(1, Ordering::SeqCst);

        let Some(guard) = InFlightGuard::acquire(&shared) else {
            let dropped = shared.dropped_ticks.fetch_add(1, Ordering::SeqCst) + 1;
            log::debug!("[Scheduler] Tick dropped, cycle still in flight ({} dropped so far)", dropped);
            continue;
        };

        let cycle = shared.cycles_started.fetch_add(1, Ordering::SeqCst) + 1;
        let context = context.clone();
        let shared = shared.clone();

        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let outcome = run_cycle(&context);
            // Context handle goes before the flag so stop() can close the store
            drop(context);
            // Clear the flag before publishing so observers see an idle pipeline
            drop(guard);
            shared.complete(cycle, started, outcome);
        });
    }

    log::debug!("[Scheduler] Driver stopped");
}
