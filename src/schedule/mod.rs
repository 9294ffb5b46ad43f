//! Scheduled publishing
//!
//! Named jobs fire a publish on a cron expression or fixed interval. Jobs
//! live only in adapter-instance memory; they do not survive process
//! restart. Each job runs as its own tokio task, so removal takes effect
//! immediately while an in-flight firing is left to complete.

mod cron;

pub use cron::CronExpression;

use crate::error::{QueueError, Result};
use crate::types::{Schedule, ScheduledJobInfo, ScheduledJobOptions};
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Publish callback injected by the owning adapter
pub(crate) type PublishFn =
    Arc<dyn Fn(String, serde_json::Value) -> BoxFuture<'static, Result<String>> + Send + Sync>;

struct JobEntry {
    info: ScheduledJobInfo,
    abort: AbortHandle,
}

/// In-memory scheduler for one adapter instance
pub(crate) struct JobScheduler {
    adapter: String,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobScheduler {
    pub(crate) fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a job; a job with the same name is replaced and its timer
    /// cancelled
    pub(crate) fn add(
        &self,
        name: &str,
        options: ScheduledJobOptions,
        publish: PublishFn,
    ) -> Result<()> {
        validate_schedule(&options.schedule)?;

        let info = ScheduledJobInfo {
            name: name.to_string(),
            subject: options.subject.clone(),
            schedule: options.schedule.clone(),
        };

        let task = tokio::spawn(run_job(
            self.adapter.clone(),
            name.to_string(),
            options,
            publish,
        ));
        let entry = JobEntry {
            info,
            abort: task.abort_handle(),
        };

        let replaced = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.insert(name.to_string(), entry)
        };
        if let Some(prev) = replaced {
            prev.abort.abort();
            tracing::info!(adapter = %self.adapter, job = name, "Scheduled job replaced");
        } else {
            tracing::info!(adapter = %self.adapter, job = name, "Scheduled job added");
        }

        Ok(())
    }

    /// Cancel a job; returns whether a job of that name existed
    pub(crate) fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.remove(name)
        };
        match removed {
            Some(entry) => {
                entry.abort.abort();
                tracing::info!(adapter = %self.adapter, job = name, "Scheduled job removed");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the registered jobs
    pub(crate) fn list(&self) -> Vec<ScheduledJobInfo> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.values().map(|e| e.info.clone()).collect()
    }

    /// Cancel all jobs. Used on adapter disconnect.
    pub(crate) fn shutdown(&self) {
        let jobs = {
            let mut guard = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for (_, entry) in jobs {
            entry.abort.abort();
        }
    }
}

fn validate_schedule(schedule: &Schedule) -> Result<()> {
    match schedule {
        Schedule::Cron { cron } => {
            CronExpression::parse(cron)?;
            Ok(())
        }
        Schedule::Every { every_ms } => {
            if *every_ms == 0 {
                Err(QueueError::Scheduling(
                    "Interval must be greater than zero".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }
}

async fn run_job(adapter: String, name: String, options: ScheduledJobOptions, publish: PublishFn) {
    loop {
        let delay = match &options.schedule {
            Schedule::Every { every_ms } => Duration::from_millis(*every_ms),
            Schedule::Cron { cron } => {
                // Validated at add time
                let expr = match CronExpression::parse(cron) {
                    Ok(expr) => expr,
                    Err(_) => break,
                };
                let now = Utc::now();
                match expr.next_after(now) {
                    Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                    None => break,
                }
            }
        };

        tokio::time::sleep(delay).await;

        match publish(options.subject.clone(), options.data.clone()).await {
            Ok(id) => {
                tracing::debug!(
                    adapter = %adapter,
                    job = %name,
                    subject = %options.subject,
                    message_id = %id,
                    "Scheduled job fired"
                );
            }
            Err(e) => {
                tracing::warn!(
                    adapter = %adapter,
                    job = %name,
                    subject = %options.subject,
                    error = %e,
                    "Scheduled publish failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_publish(count: Arc<AtomicUsize>) -> PublishFn {
        Arc::new(move |_, _| {
            let count = count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok("msg-test".to_string())
            })
        })
    }

    fn tick_options(every_ms: u64) -> ScheduledJobOptions {
        ScheduledJobOptions {
            subject: "sys.tick".to_string(),
            data: serde_json::json!({}),
            schedule: Schedule::Every { every_ms },
        }
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let scheduler = JobScheduler::new("ephemeral");
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .add("tick", tick_options(60_000), counting_publish(count))
            .unwrap();

        let jobs = scheduler.list();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "tick");
        assert_eq!(jobs[0].subject, "sys.tick");
    }

    #[tokio::test]
    async fn test_add_invalid_schedule() {
        let scheduler = JobScheduler::new("ephemeral");
        let count = Arc::new(AtomicUsize::new(0));

        let result = scheduler.add("zero", tick_options(0), counting_publish(count.clone()));
        assert!(matches!(result, Err(QueueError::Scheduling(_))));

        let bad_cron = ScheduledJobOptions {
            subject: "sys.tick".to_string(),
            data: serde_json::json!({}),
            schedule: Schedule::Cron {
                cron: "bad".to_string(),
            },
        };
        assert!(scheduler
            .add("bad", bad_cron, counting_publish(count))
            .is_err());
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_add_replaces_same_name() {
        let scheduler = JobScheduler::new("ephemeral");
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .add("tick", tick_options(60_000), counting_publish(count.clone()))
            .unwrap();
        let replacement = ScheduledJobOptions {
            subject: "sys.other".to_string(),
            data: serde_json::json!({}),
            schedule: Schedule::Every { every_ms: 30_000 },
        };
        scheduler
            .add("tick", replacement, counting_publish(count))
            .unwrap();

        let jobs = scheduler.list();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].subject, "sys.other");
        assert_eq!(jobs[0].schedule, Schedule::Every { every_ms: 30_000 });
    }

    #[tokio::test]
    async fn test_remove() {
        let scheduler = JobScheduler::new("ephemeral");
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .add("tick", tick_options(60_000), counting_publish(count))
            .unwrap();

        assert!(scheduler.remove("tick"));
        assert!(!scheduler.remove("tick"));
        assert!(!scheduler.remove("never-added"));
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_job_fires() {
        let scheduler = JobScheduler::new("ephemeral");
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .add("tick", tick_options(1000), counting_publish(count.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_job_stops_firing() {
        let scheduler = JobScheduler::new("ephemeral");
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .add("tick", tick_options(100), counting_publish(count.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(scheduler.remove("tick"));
        let at_removal = count.load(Ordering::SeqCst);
        assert!(at_removal >= 2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_removal);
    }

    #[tokio::test]
    async fn test_shutdown_clears_jobs() {
        let scheduler = JobScheduler::new("stream");
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .add("a", tick_options(60_000), counting_publish(count.clone()))
            .unwrap();
        scheduler
            .add("b", tick_options(60_000), counting_publish(count))
            .unwrap();

        scheduler.shutdown();
        assert!(scheduler.list().is_empty());
    }
}
