//! Cron driven invocation of registered tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Work fired by a scheduler on every tick.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run_scheduled(&self);
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn start(&self, task_key: &str, expression: &str, task: Arc<dyn ScheduledTask>) -> Result<()>;

    /// Returns whether a task was registered under `task_key`.
    async fn stop(&self, task_key: &str) -> bool;
}

/// When a task fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period, written as plain seconds (`"30"`)
    Every(Duration),
    /// Quartz style expression with a seconds field, e.g. `0 0/5 8-18 * * ?`
    Cron(Box<Schedule>),
}

impl Cadence {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if let Ok(seconds) = expression.parse::<u64>() {
            if seconds == 0 {
                return Err(Error::Config(format!(
                    "Schedule {:?} has a zero period",
                    expression
                )));
            }
            return Ok(Cadence::Every(Duration::from_secs(seconds)));
        }

        Schedule::from_str(expression)
            .map(|schedule| Cadence::Cron(Box::new(schedule)))
            .map_err(|e| Error::Config(format!("Invalid schedule {:?}: {}", expression, e)))
    }

    /// First firing strictly after both the previous firing and `now`.
    ///
    /// Firings missed while a tick was late are skipped, not replayed.
    pub fn next_after(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = previous.max(now);
        match self {
            Cadence::Every(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|period| from.checked_add_signed(period)),
            Cadence::Cron(schedule) => schedule.after(&from).next(),
        }
    }
}

/// Fires tasks on tokio timers.
///
/// Every tick is spawned separately, so a slow task can overlap with the
/// next tick; tasks guard themselves against that.
#[derive(Default)]
pub struct CronScheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_running(&self, task_key: &str) -> bool {
        self.tasks.lock().await.contains_key(task_key)
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn start(&self, task_key: &str, expression: &str, task: Arc<dyn ScheduledTask>) -> Result<()> {
        let cadence = Cadence::parse(expression)?;
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(task_key) {
            previous.abort();
        }

        info!("Scheduling {} on {:?}", task_key, expression);
        let key = task_key.to_string();
        let handle = match cadence {
            Cadence::Every(period) => tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    ticker.tick().await;
                    debug!("Tick for {}", key);
                    let task = task.clone();
                    tokio::spawn(async move { task.run_scheduled().await });
                }
            }),
            cadence @ Cadence::Cron(_) => tokio::spawn(async move {
                let mut previous = Utc::now();
                loop {
                    let now = Utc::now();
                    let Some(next) = cadence.next_after(previous, now) else {
                        warn!("Schedule for {} has no upcoming firing", key);
                        break;
                    };
                    debug!("Next run of {} at {}", key, next);
                    tokio::time::sleep((next - now).to_std().unwrap_or(Duration::ZERO)).await;
                    previous = next;

                    debug!("Tick for {}", key);
                    let task = task.clone();
                    tokio::spawn(async move { task.run_scheduled().await });
                }
            }),
        };
        tasks.insert(task_key.to_string(), handle);
        Ok(())
    }

    async fn stop(&self, task_key: &str) -> bool {
        match self.tasks.lock().await.remove(task_key) {
            Some(handle) => {
                handle.abort();
                info!("Stopped schedule {}", task_key);
                true
            }
            None => false,
        }
    }
}
