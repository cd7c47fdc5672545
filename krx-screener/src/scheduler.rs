//! Scan scheduler.
//!
//! Fires the screening run on a cron schedule evaluated in exchange-local
//! time, plus once shortly after startup. Every fire runs on its own task,
//! so a long scan never blocks the HTTP handlers.
//!
//! # Schedule Configuration
//!
//! ```json
//! {
//!   "screener": {
//!     "enabled": true,
//!     "schedule_cron": "0 30 17 * * Mon-Fri",
//!     "startup_delay_secs": 10,
//!     "utc_offset_hours": 9
//!   }
//! }
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use krx_common::ScreenerConfig;

use crate::data::Market;
use crate::error::ScreeningError;
use crate::screener::{exchange_today, RunStats, ScreeningPipeline, Snapshot, SnapshotStore};

/// How often the loop checks for a due fire time
const CHECK_INTERVAL_SECS: u64 = 10;

/// A fire time older than this is considered missed, not due
const FIRE_WINDOW_SECS: i64 = 60;

// ============================================================================
// State
// ============================================================================

/// Scheduler loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Run guard: at most one screening run at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Scheduler status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub scheduler: SchedulerState,
    pub scan: ScanState,
    pub market: Market,
    pub schedule: String,
    pub next_run_at: Option<DateTime<FixedOffset>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_trading_date: Option<NaiveDate>,
    pub last_stats: Option<RunStats>,
    pub last_error: Option<String>,
    pub runs_completed: u64,
}

// ============================================================================
// Scan Scheduler
// ============================================================================

/// Owns the schedule and the run guard.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ScanScheduler {
    config: ScreenerConfig,
    market: Market,
    schedule: Schedule,
    pipeline: Arc<ScreeningPipeline>,
    store: Arc<SnapshotStore>,
    state: Arc<RwLock<SchedulerState>>,
    running: Arc<AtomicBool>,
    status: Arc<RwLock<SchedulerStatus>>,
    last_fire: Arc<RwLock<Option<DateTime<FixedOffset>>>>,
}

impl ScanScheduler {
    pub fn new(
        config: ScreenerConfig,
        market: Market,
        pipeline: Arc<ScreeningPipeline>,
        store: Arc<SnapshotStore>,
    ) -> krx_common::Result<Self> {
        let schedule = config.schedule()?;

        let status = SchedulerStatus {
            scheduler: SchedulerState::Stopped,
            scan: ScanState::Idle,
            market,
            schedule: config.schedule_cron.clone(),
            next_run_at: schedule.upcoming(config.timezone()).next(),
            last_started_at: None,
            last_finished_at: None,
            last_trading_date: None,
            last_stats: None,
            last_error: None,
            runs_completed: 0,
        };

        info!(
            schedule = %config.schedule_cron,
            utc_offset_hours = config.utc_offset_hours,
            startup_delay_secs = config.startup_delay_secs,
            "Scan scheduler configured"
        );

        Ok(Self {
            config,
            market,
            schedule,
            pipeline,
            store,
            state: Arc::new(RwLock::new(SchedulerState::Stopped)),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(status)),
            last_fire: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.scan = self.scan_state();
        status
    }

    pub fn scan_state(&self) -> ScanState {
        if self.running.load(Ordering::Acquire) {
            ScanState::Running
        } else {
            ScanState::Idle
        }
    }

    /// Stop the scheduler loop. An in-flight scan runs to completion.
    pub async fn stop(&self) {
        *self.state.write().await = SchedulerState::Stopped;
        self.status.write().await.scheduler = SchedulerState::Stopped;
        info!("Scan scheduler stopped");
    }

    /// Run the scheduler loop until `stop` is called.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Scan scheduler disabled, not starting");
            return;
        }

        *self.state.write().await = SchedulerState::Running;
        self.status.write().await.scheduler = SchedulerState::Running;
        info!("Scan scheduler started");

        let mut check_interval = interval(Duration::from_secs(CHECK_INTERVAL_SECS));

        loop {
            check_interval.tick().await;

            if *self.state.read().await == SchedulerState::Stopped {
                break;
            }

            let now = Utc::now().with_timezone(&self.config.timezone());
            let last = *self.last_fire.read().await;

            if let Some(fire) = due_fire(&self.schedule, now, last) {
                *self.last_fire.write().await = Some(fire);
                self.status.write().await.next_run_at = self.schedule.after(&now).next();
                info!(fire_time = %fire, "Scheduled scan due");
                self.fire("scheduled").await;
            }
        }
    }

    /// Run a single scan after `startup_delay_secs`.
    ///
    /// The returned task finishes once that scan has finished.
    pub fn spawn_startup_scan(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if !this.config.enabled {
                return;
            }
            tokio::time::sleep(Duration::from_secs(this.config.startup_delay_secs)).await;
            info!("Startup scan due");

            match this.trigger_scan().await {
                Ok(snapshot) => {
                    info!(trigger = "startup", trading_date = %snapshot.trading_date, "Scan finished")
                }
                Err(ScreeningError::AlreadyRunning) => {
                    warn!(trigger = "startup", "Scan already in progress, skipping trigger")
                }
                // Already logged by the run itself
                Err(_) => {}
            }
        })
    }

    /// Start a scan in the background.
    ///
    /// The guard is taken before spawning, so a second caller is rejected
    /// immediately with `AlreadyRunning`.
    pub async fn spawn_scan(
        &self,
    ) -> Result<JoinHandle<Result<Snapshot, ScreeningError>>, ScreeningError> {
        let guard = self.acquire_guard().await?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.run_guarded(guard).await }))
    }

    /// Run a scan on the current task and persist its snapshot.
    pub async fn trigger_scan(&self) -> Result<Snapshot, ScreeningError> {
        let guard = self.acquire_guard().await?;
        self.run_guarded(guard).await
    }

    async fn fire(&self, trigger: &'static str) {
        match self.spawn_scan().await {
            Ok(_) => info!(trigger, "Scan started"),
            Err(ScreeningError::AlreadyRunning) => {
                warn!(trigger, "Scan already in progress, skipping trigger")
            }
            Err(e) => error!(trigger, error = %e, "Failed to start scan"),
        }
    }

    async fn acquire_guard(&self) -> Result<RunGuard, ScreeningError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ScreeningError::AlreadyRunning);
        }
        let guard = RunGuard {
            running: Arc::clone(&self.running),
        };

        let mut status = self.status.write().await;
        status.last_started_at = Some(Utc::now());
        status.last_error = None;
        Ok(guard)
    }

    /// Body of a scan. Consumes the guard, which is released even if the
    /// run panics.
    async fn run_guarded(&self, guard: RunGuard) -> Result<Snapshot, ScreeningError> {
        let today = exchange_today(&self.config);
        let result = self.run_and_persist(today).await;
        drop(guard);

        let mut status = self.status.write().await;
        status.last_finished_at = Some(Utc::now());

        match &result {
            Ok(snapshot) => {
                status.last_trading_date = Some(snapshot.trading_date);
                status.last_stats = Some(snapshot.stats.clone());
                status.runs_completed += 1;
            }
            Err(e) => {
                error!(error = %e, market = %self.market, "Screening run failed, no snapshot written");
                status.last_error = Some(e.to_string());
            }
        }

        result
    }

    async fn run_and_persist(&self, today: NaiveDate) -> Result<Snapshot, ScreeningError> {
        let run = self.pipeline.run(self.market, today).await?;

        // A run cut off before looking at any ticker says nothing about the day.
        if run.stats.deadline_hit && run.stats.processed == 0 {
            match self.store.load(run.trading_date).await {
                Ok(existing) => {
                    warn!(
                        trading_date = %run.trading_date,
                        "Run deadline hit before any ticker, keeping existing snapshot"
                    );
                    return Ok(existing);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(error = %e, "Existing snapshot unreadable, replacing it"),
            }
        }

        let snapshot = Snapshot::from(run);
        self.store.save(&snapshot).await?;
        Ok(snapshot)
    }
}

/// Marks a scan as running; dropping it clears the mark.
struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// The most recent fire time that is due at `now`.
///
/// Due means it passed less than a minute ago and is later than `last`,
/// the previous fire that was acted on.
pub fn due_fire(
    schedule: &Schedule,
    now: DateTime<FixedOffset>,
    last: Option<DateTime<FixedOffset>>,
) -> Option<DateTime<FixedOffset>> {
    let after = last.unwrap_or_else(|| now - chrono::Duration::hours(1));

    let mut due = None;
    for scheduled in schedule.after(&after).take(10) {
        if scheduled > now {
            break;
        }
        if now.signed_duration_since(scheduled) < chrono::Duration::seconds(FIRE_WINDOW_SECS) {
            due = Some(scheduled);
        }
    }
    due
}

// ============================================================================
// Tests
// ============================================================================
