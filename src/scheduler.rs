//! Periodic scan timer.
//!
//! One background job ticks every `check_interval_minutes` and runs
//! [`Engine::run_scheduled_scan`]. The job is rebuilt whenever settings
//! change, so a new interval takes effect immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::engine::Engine;
use crate::settings::MAX_CHECK_INTERVAL_MINUTES;
use crate::types::ScheduleState;

pub struct Scheduler {
    engine: Arc<Engine>,
    state: Arc<RwLock<ScheduleState>>,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: Arc::new(RwLock::new(ScheduleState {
                last_check_time: None,
                next_check_time: None,
                interval_minutes: 0,
            })),
            job: Mutex::new(None),
        }
    }

    /// Install the periodic job and kick off an initial scan right away.
    pub async fn start(&self) {
        self.schedule_job().await;

        let engine = self.engine.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            info!("Running initial update check");
            run_scan(&engine, &state).await;
        });
    }

    /// Re-read the interval and replace the periodic job.
    pub async fn on_settings_changed(&self) {
        self.schedule_job().await;
    }

    pub async fn schedule_info(&self) -> ScheduleState {
        self.state.read().await.clone()
    }

    /// Stop the timer. A scan already in flight runs to completion.
    pub async fn shutdown(&self) {
        if let Some(job) = self.job.lock().await.take() {
            job.abort();
        }
        self.state.write().await.next_check_time = None;
        info!("Scheduler stopped");
    }

    async fn schedule_job(&self) {
        let mut job = self.job.lock().await;
        if let Some(old) = job.take() {
            old.abort();
        }

        let configured = self.engine.settings().get_all().await.check_interval_minutes;
        let minutes = configured.clamp(1, MAX_CHECK_INTERVAL_MINUTES);
        if minutes != configured {
            warn!(
                "Check interval of {} minutes is out of range, using {}",
                configured, minutes
            );
        }
        let period = Duration::from_secs(minutes * 60);
        let delta = chrono::Duration::minutes(minutes as i64);
        {
            let mut state = self.state.write().await;
            state.interval_minutes = minutes;
            state.next_check_time = Some(Utc::now() + delta);
        }
        info!("Scheduled update checks every {} minutes", minutes);

        let engine = self.engine.clone();
        let state = self.state.clone();
        *job = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Detached so that aborting the timer never interrupts a replacement.
                let scan = tokio::spawn({
                    let engine = engine.clone();
                    let state = state.clone();
                    async move { run_scan(&engine, &state).await }
                });
                if let Err(e) = scan.await {
                    error!("Scheduled scan task failed: {}", e);
                }
                state.write().await.next_check_time = Some(Utc::now() + delta);
            }
        }));
    }
}

async fn run_scan(engine: &Engine, state: &RwLock<ScheduleState>) {
    state.write().await.last_check_time = Some(Utc::now());
    match engine.run_scheduled_scan().await {
        Ok(report) => info!(
            "Scheduled check finished: {} updated, {} up to date, {} skipped, {} errors",
            report.summary.updated,
            report.summary.up_to_date,
            report.summary.skipped,
            report.summary.errors
        ),
        Err(e) => error!("Scheduled check failed: {}", e),
    }
}
