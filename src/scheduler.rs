//! `Scheduler` — the cron-driven dispatcher.
//!
//! Grounded on `own-ai-app`'s `scheduler/mod.rs::Scheduler`, which wraps a
//! `tokio_cron_scheduler::JobScheduler` and keeps a side map from an
//! application-level id to the scheduler's own job uuid
//! (`job_ids: HashMap<String, uuid::Uuid>`); `validate_cron_expression`'s use
//! of `croner` is reused unchanged since spec.md's 5-field cron requirement
//! is the same format the teacher already validates against.
//!
//! `cron_id` here is a small positive counter (spec.md's "0 means not
//! installed" convention from `original_source/server/tasks.go`), mapped
//! internally onto the job scheduler's own `Uuid` — the original's gRPC
//! surface exposes a `u64`, not a uuid, so this indirection keeps that
//! external shape without giving up `tokio-cron-scheduler`'s own identifiers.
//!
//! The "skip if still running" property lives in the Executor's admission
//! check (spec.md §4.2/§4.3), not here: this component's only job is firing
//! the callback on schedule.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::ServiceError;

/// Validates a cron expression the way `own-ai-app`'s
/// `validate_cron_expression` does: `croner` accepts both 5-field (standard)
/// and 6-field (seconds-resolution) forms; spec.md only requires the
/// standard 5-field form to parse, which this also accepts.
pub fn validate_cron_expression(expr: &str) -> Result<(), ServiceError> {
    expr.parse::<croner::Cron>()
        .map(|_| ())
        .map_err(|e| ServiceError::Validation(format!("invalid cron schedule: {e}")))
}

struct Installed {
    cron_id: u64,
    job_id: uuid::Uuid,
}

pub struct Scheduler {
    inner: Mutex<Inner>,
}

struct Inner {
    job_scheduler: Option<JobScheduler>,
    installed: HashMap<String, Installed>,
    next_cron_id: u64,
    running: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            inner: Mutex::new(Inner {
                job_scheduler: None,
                installed: HashMap::new(),
                next_cron_id: 1,
                running: false,
            }),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// Starts the underlying job scheduler. Returns
    /// [`ServiceError::SchedulerAlreadyStarted`] if already running, matching
    /// spec.md §4.2 / §6 (`SchedulerStart`).
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut guard = self.inner.lock().await;
        if guard.running {
            return Err(ServiceError::SchedulerAlreadyStarted);
        }
        let job_scheduler = JobScheduler::new()
            .await
            .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("starting scheduler: {e}")))?;
        job_scheduler
            .start()
            .await
            .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("starting scheduler: {e}")))?;
        guard.job_scheduler = Some(job_scheduler);
        guard.running = true;
        Ok(())
    }

    /// Installs a cron job for `uuid` firing `on_fire` on `schedule`.
    /// Returns the application-level `cron_id` to store on the `Task`.
    pub async fn install<F>(
        &self,
        uuid: &str,
        schedule: &str,
        on_fire: F,
    ) -> Result<u64, ServiceError>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    {
        let mut guard = self.inner.lock().await;
        let mut job_scheduler = guard
            .job_scheduler
            .as_ref()
            .ok_or(ServiceError::SchedulerAlreadyStopped)?
            .clone();
        let on_fire = Arc::new(on_fire);
        let job = Job::new_async(schedule, move |_job_id, _scheduler| {
            let on_fire = on_fire.clone();
            Box::pin(async move {
                (on_fire)().await;
            })
        })
        .map_err(|e| ServiceError::Validation(format!("invalid cron schedule: {e}")))?;
        let job_id = job.guid();
        job_scheduler
            .add(job)
            .await
            .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("installing job: {e}")))?;
        let cron_id = guard.next_cron_id;
        guard.next_cron_id += 1;
        guard
            .installed
            .insert(uuid.to_string(), Installed { cron_id, job_id });
        Ok(cron_id)
    }

    /// Removes `uuid`'s installed cron job, if any.
    pub async fn uninstall(&self, uuid: &str) -> Result<(), ServiceError> {
        let mut guard = self.inner.lock().await;
        let Some(installed) = guard.installed.remove(uuid) else {
            return Ok(());
        };
        if let Some(job_scheduler) = &mut guard.job_scheduler {
            job_scheduler
                .remove(&installed.job_id)
                .await
                .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("removing job: {e}")))?;
        }
        Ok(())
    }

    pub async fn installed_uuids(&self) -> Vec<String> {
        self.inner.lock().await.installed.keys().cloned().collect()
    }

    /// Removes every installed cron entry and shuts the job scheduler down,
    /// returning it to a state where [`Scheduler::start`] can be called
    /// again. Does not touch `RunStateMap` — forced cancellation of running
    /// tasks is the caller's (`Core::scheduler_stop`) responsibility, per
    /// spec.md §4.2.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut guard = self.inner.lock().await;
        if !guard.running {
            return Err(ServiceError::SchedulerAlreadyStopped);
        }
        if let Some(mut job_scheduler) = guard.job_scheduler.take() {
            let _ = job_scheduler.shutdown().await;
        }
        guard.installed.clear();
        guard.running = false;
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_standard_five_field_cron() {
        assert!(validate_cron_expression("*/5 * * * *").is_ok());
    }

    #[test]
    fn rejects_garbage_cron() {
        assert!(validate_cron_expression("not a cron").is_err());
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let scheduler = Scheduler::new();
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await.unwrap_err(),
            ServiceError::SchedulerAlreadyStarted
        ));
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let scheduler = Scheduler::new();
        assert!(matches!(
            scheduler.stop().await.unwrap_err(),
            ServiceError::SchedulerAlreadyStopped
        ));
    }

    #[tokio::test]
    async fn install_and_uninstall_tracks_cron_id() {
        let scheduler = Scheduler::new();
        scheduler.start().await.unwrap();
        let cron_id = scheduler
            .install("t1", "*/5 * * * *", || Box::pin(async {}))
            .await
            .unwrap();
        assert_eq!(cron_id, 1);
        assert_eq!(scheduler.installed_uuids().await, vec!["t1".to_string()]);
        scheduler.uninstall("t1").await.unwrap();
        assert!(scheduler.installed_uuids().await.is_empty());
    }
}
