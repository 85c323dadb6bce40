//! Scheduler (spec §4.H): triggers cycles at a configured interval with
//! no-overlap semantics, runs a daily cleanup at a fixed wall-clock time, and
//! an independent watchdog that fails stale cycles.
//!
//! Grounded on `pinnacle::PinnacleService::run`'s `tokio::time::interval`
//! loop, extended with the pause/resume/trigger_now surface and a second,
//! independent watchdog task the teacher has no analogue for.

use crate::coordinator::EventCoordinator;
use crate::db;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    coordinator: Arc<EventCoordinator>,
    pool: sqlx::PgPool,
    interval: AtomicU64,
    paused: AtomicBool,
    stopped: AtomicBool,
    retention_days: i64,
    cleanup_hour_utc: u32,
    cleanup_minute_utc: u32,
    watchdog_interval: std::time::Duration,
    watchdog_staleness_threshold: chrono::Duration,
    interval_changed: Notify,
}

impl Scheduler {
    pub fn new(coordinator: Arc<EventCoordinator>, pool: sqlx::PgPool, config: &crate::config::Config) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            pool,
            interval: AtomicU64::new(config.scrape_interval.as_secs()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            retention_days: config.retention_days,
            cleanup_hour_utc: config.cleanup_hour_utc,
            cleanup_minute_utc: config.cleanup_minute_utc,
            watchdog_interval: config.watchdog_interval,
            watchdog_staleness_threshold: chrono::Duration::from_std(config.watchdog_staleness_threshold)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
            interval_changed: Notify::new(),
        })
    }

    /// Spawn the cycle-trigger loop, the daily cleanup task, and the
    /// watchdog. On startup, any cycle left `Running` by a previous process
    /// is marked failed immediately (spec §4.H "On process start...").
    pub fn start(self: &Arc<Self>) {
        let now = chrono::Utc::now().naive_utc();
        let stale = self.coordinator.registry().mark_stale_as_failed(now, chrono::Duration::zero());
        if stale > 0 {
            warn!(stale, "marked stale cycles from a previous process as failed");
        }

        self.spawn_cycle_loop();
        self.spawn_cleanup_task();
        self.spawn_watchdog();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn trigger_now(self: &Arc<Self>) -> u64 {
        self.coordinator.spawn_cycle()
    }

    pub fn set_interval(&self, secs: u64) {
        self.interval.store(secs, Ordering::SeqCst);
        self.interval_changed.notify_one();
    }

    fn spawn_cycle_loop(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                if this.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let secs = this.interval.load(Ordering::SeqCst).max(1);
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {}
                    _ = this.interval_changed.notified() => { continue; }
                }

                if this.stopped.load(Ordering::SeqCst) {
                    break;
                }
                if this.paused.load(Ordering::SeqCst) {
                    debug!("scheduler paused, skipping cycle");
                    continue;
                }

                // No-overlap: run the cycle to completion before sleeping
                // again, so an overrun simply skips the next tick rather
                // than stacking cycles.
                this.coordinator.run_cycle().await;
            }
            info!("scheduler cycle loop stopped");
        });
    }

    fn spawn_cleanup_task(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                if this.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let sleep_for = this.duration_until_next_cleanup();
                tokio::time::sleep(sleep_for).await;
                if this.stopped.load(Ordering::SeqCst) {
                    break;
                }
                match db::cleanup_history(&this.pool, this.retention_days).await {
                    Ok(deleted) => info!(deleted, "daily history cleanup complete"),
                    Err(e) => error!(error = %e, "daily history cleanup failed"),
                }
            }
        });
    }

    fn duration_until_next_cleanup(&self) -> std::time::Duration {
        let now = chrono::Utc::now().naive_utc();
        let today_at = now
            .date()
            .and_hms_opt(self.cleanup_hour_utc, self.cleanup_minute_utc, 0)
            .unwrap_or(now);
        let next = if today_at > now {
            today_at
        } else {
            today_at + chrono::Duration::days(1)
        };
        (next - now).to_std().unwrap_or(std::time::Duration::from_secs(3600))
    }

    fn spawn_watchdog(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                if this.stopped.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(this.watchdog_interval).await;
                let now = chrono::Utc::now().naive_utc();
                let marked = this
                    .coordinator
                    .registry()
                    .mark_stale_as_failed(now, this.watchdog_staleness_threshold);
                if marked > 0 {
                    warn!(marked, "watchdog marked overrun cycles as failed");
                }
            }
        });
    }
}
