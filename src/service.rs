//! The Service facade: `Core` plus the transport-agnostic `TaskManager`
//! trait spec.md §4.7/§6 describes as "one method per RPC".
//!
//! Grounded on `own-ai-app`'s `commands/scheduler.rs` (`#[tauri::command]`
//! handlers returning `Result<T, String>`) and its `AppHandle::emit` push
//! pattern, generalized here into plain async methods returning
//! `Result<T, ServiceError>` and a subscriber-channel fan-out instead of a
//! GUI event bus — `transport.rs`'s axum router is the only consumer that
//! needs to know this trait exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServiceError;
use crate::events::{Event, EventBus, FileLogger, SubscriberMap};
use crate::executor;
use crate::registry::TaskRegistry;
use crate::run_state::RunStateMap;
use crate::scheduler::Scheduler;
use crate::task::Task;

pub struct Core {
    pub config: Arc<Config>,
    pub registry: TaskRegistry,
    pub run_states: RunStateMap,
    pub scheduler: Scheduler,
    pub subscribers: Arc<SubscriberMap>,
    pub event_bus: EventBus,
    pub file_logger: Arc<FileLogger>,
}

impl Core {
    pub async fn new(config: Config) -> Result<Arc<Core>, ServiceError> {
        let config = Arc::new(config);
        let registry = TaskRegistry::load(config.tasks_file_path(), &config.apps).await?;
        let file_logger = Arc::new(FileLogger::new(config.log_folder_path(), config.log_limit));
        let subscribers = Arc::new(SubscriberMap::new());
        let event_bus = EventBus::spawn(file_logger.clone(), subscribers.clone());

        Ok(Arc::new(Core {
            config,
            registry,
            run_states: RunStateMap::new(),
            scheduler: Scheduler::new(),
            subscribers,
            event_bus,
            file_logger,
        }))
    }

    /// Installs cron jobs for every enabled task on disk, starting the
    /// scheduler first if it is not already running. Used both at
    /// `schedulerd` startup and by `SchedulerStart`, mirroring
    /// `original_source/server/cron.go::start`'s "clear stale entries then
    /// register all enabled tasks" sequence.
    pub async fn bootstrap_scheduler(self: &Arc<Self>) -> Result<(), ServiceError> {
        self.scheduler.start().await?;
        for task in self.registry.list().await {
            if task.enabled {
                self.install_cron_job(&task).await?;
            }
        }
        Ok(())
    }

    async fn install_cron_job(self: &Arc<Self>, task: &Task) -> Result<u64, ServiceError> {
        let core = self.clone();
        let uuid = task.uuid.clone();
        let cron_id = self
            .scheduler
            .install(&task.uuid, &task.schedule, move || {
                let core = core.clone();
                let uuid = uuid.clone();
                Box::pin(async move {
                    executor::run_scheduled(core, uuid).await;
                })
            })
            .await?;
        self.registry.mark_started(&task.uuid, cron_id).await?;
        Ok(cron_id)
    }
}

/// One method per row of spec.md §6's operation table.
#[allow(async_fn_in_trait)]
pub trait TaskManager {
    async fn apps_list(&self) -> Result<HashMap<String, String>, ServiceError>;

    async fn task_create(&self, task: Task) -> Result<Task, ServiceError>;
    async fn task_update(&self, uuid: &str, task: Task) -> Result<Task, ServiceError>;
    async fn task_delete(&self, uuid: &str) -> Result<(), ServiceError>;
    async fn task_start(self: &Arc<Self>, uuid: &str) -> Result<(), ServiceError>;
    async fn task_stop(&self, uuid: &str, force: bool) -> Result<(), ServiceError>;
    async fn task_run(self: &Arc<Self>, uuid: &str) -> Result<(), ServiceError>;
    async fn tasks_list(&self) -> Result<Vec<Task>, ServiceError>;

    async fn scheduler_start(self: &Arc<Self>) -> Result<(), ServiceError>;
    async fn scheduler_stop(&self, force: bool) -> Result<(), ServiceError>;
    async fn scheduler_watch(&self) -> (Uuid, mpsc::Receiver<Event>);
    async fn scheduler_running_tasks(&self) -> Result<Vec<String>, ServiceError>;

    async fn exec_cmd(
        &self,
        app: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<executor::ExecResult, ServiceError>;

    async fn log_list(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<Event>, ServiceError>;
    async fn log_get(&self, uuid: &str) -> Result<Vec<Event>, ServiceError>;
}

impl TaskManager for Core {
    async fn apps_list(&self) -> Result<HashMap<String, String>, ServiceError> {
        Ok(self.config.apps.clone())
    }

    async fn task_create(&self, task: Task) -> Result<Task, ServiceError> {
        self.registry.create(task, &self.config.apps).await
    }

    async fn task_update(&self, uuid: &str, task: Task) -> Result<Task, ServiceError> {
        self.registry.update(uuid, task, &self.config.apps).await
    }

    async fn task_delete(&self, uuid: &str) -> Result<(), ServiceError> {
        self.registry.delete(uuid).await
    }

    async fn task_start(self: &Arc<Self>, uuid: &str) -> Result<(), ServiceError> {
        let task = self
            .registry
            .get(uuid)
            .await
            .ok_or(ServiceError::NotFound("task"))?;
        if task.cron_id != 0 {
            return Err(ServiceError::TaskAlreadyStarted);
        }
        self.install_cron_job(&task).await?;
        executor::emit(self, uuid, crate::events::EventKind::Sys, "sys/taskStart").await;
        Ok(())
    }

    /// `stop(force=false)` polls every 200ms until `RunStateMap` clears
    /// *before* touching the registry lock, exactly as
    /// `original_source/server/tasks.go::stop` does — never hold the
    /// registry write lock while waiting for a child process, per spec.md
    /// §5's deadlock note.
    ///
    /// `stop(force=true)` cancels the *deepest* currently-running entry of
    /// `uuid`'s chain, not `uuid` itself: once `A`'s `run_admitted` has
    /// chained into `B`, `A`'s own `select!` has already resolved and
    /// cancelling its token again does nothing, exactly as
    /// `original_source/server/tasks.go::stop`'s `for lastTask.NextTask !=
    /// "" && tasksCTX.get(...) != nil` loop walks to the live end of the
    /// chain before cancelling.
    async fn task_stop(&self, uuid: &str, force: bool) -> Result<(), ServiceError> {
        if force {
            let mut last_uuid = uuid.to_string();
            let mut current = self.registry.get(uuid).await;
            while let Some(task) = current {
                let Some(next_uuid) = task.next_task.as_ref().filter(|n| !n.is_empty()) else {
                    break;
                };
                if !self.run_states.contains(next_uuid).await {
                    break;
                }
                last_uuid = next_uuid.clone();
                current = self.registry.get(next_uuid).await;
            }
            self.run_states.cancel(&last_uuid).await;
        } else {
            while self.run_states.contains(uuid).await {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        self.scheduler.uninstall(uuid).await?;
        self.registry.mark_stopped(uuid).await?;
        executor::emit(self, uuid, crate::events::EventKind::Sys, "sys/taskStop").await;
        Ok(())
    }

    async fn task_run(self: &Arc<Self>, uuid: &str) -> Result<(), ServiceError> {
        if self.run_states.contains(uuid).await {
            return Err(ServiceError::AlreadyRunning);
        }
        let task = self
            .registry
            .get(uuid)
            .await
            .ok_or(ServiceError::NotFound("task"))?;
        let core = self.clone();
        tokio::spawn(async move {
            executor::run_admitted(core, task).await;
        });
        Ok(())
    }

    async fn tasks_list(&self) -> Result<Vec<Task>, ServiceError> {
        Ok(self.registry.list().await)
    }

    async fn scheduler_start(self: &Arc<Self>) -> Result<(), ServiceError> {
        Core::bootstrap_scheduler(self).await
    }

    /// Forced stop cancels every running task first, then removes every
    /// cron entry — `original_source/server/cron.go::stop(force)` order.
    async fn scheduler_stop(&self, force: bool) -> Result<(), ServiceError> {
        if force {
            for uuid in self.run_states.running_uuids().await {
                self.run_states.cancel(&uuid).await;
            }
        } else {
            while self.run_states.len().await > 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        self.scheduler.stop().await?;
        self.registry.reset_all_cron_ids().await
    }

    async fn scheduler_watch(&self) -> (Uuid, mpsc::Receiver<Event>) {
        self.subscribers.subscribe(64).await
    }

    async fn scheduler_running_tasks(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.run_states.running_uuids().await)
    }

    async fn exec_cmd(
        &self,
        app: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<executor::ExecResult, ServiceError> {
        let app_path = self
            .config
            .apps
            .get(app)
            .ok_or_else(|| ServiceError::Validation(format!("app '{app}' is not registered")))?;
        Ok(executor::run_ad_hoc(app_path, args, timeout).await)
    }

    async fn log_list(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<Event>, ServiceError> {
        self.file_logger
            .read_range(from, to)
            .await
            .map_err(ServiceError::ConfigLoad)
    }

    async fn log_get(&self, uuid: &str) -> Result<Vec<Event>, ServiceError> {
        let events = self.log_list(None, None).await?;
        Ok(events.into_iter().filter(|e| e.uuid == uuid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    async fn test_core(dir: &std::path::Path) -> Arc<Core> {
        let mut apps = Map::new();
        apps.insert("echo".to_string(), "/bin/echo".to_string());
        apps.insert("sleep".to_string(), "/bin/sleep".to_string());
        let config = Config {
            server_address: "127.0.0.1".into(),
            server_port: "0".into(),
            tasks_file: dir.join("tasks.yaml").to_string_lossy().into_owned(),
            log_folder: dir.join("logs").to_string_lossy().into_owned(),
            log_limit: -1,
            ssl: Default::default(),
            apps,
        };
        Core::new(config).await.unwrap()
    }

    fn echo_task() -> Task {
        Task {
            uuid: String::new(),
            name: "echo-task".into(),
            description: String::new(),
            tags: String::new(),
            schedule: "0 0 * * *".into(),
            app: "echo".into(),
            args: vec!["hi".to_string()],
            work_dir: None,
            timeout_secs: 5,
            enabled: false,
            cron_id: 0,
            next_task: None,
        }
    }

    #[tokio::test]
    async fn create_then_run_emits_exit_status_event() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(dir.path()).await;
        let task = core.task_create(echo_task()).await.unwrap();
        let (_id, mut rx) = core.scheduler_watch().await;
        core.task_run(&task.uuid).await.unwrap();
        let mut saw_exit = false;
        for _ in 0..10 {
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
            {
                if matches!(event.kind, crate::events::EventKind::ExitStatus) {
                    saw_exit = true;
                    break;
                }
            }
        }
        assert!(saw_exit);
    }

    #[tokio::test]
    async fn task_run_rejects_concurrent_run() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(dir.path()).await;
        let mut task = echo_task();
        task.app = "sleep".into();
        task.args = vec!["1".to_string()];
        let task = core.task_create(task).await.unwrap();
        core.task_run(&task.uuid).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = core.task_run(&task.uuid).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyRunning));
    }

    #[tokio::test]
    async fn scheduler_start_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(dir.path()).await;
        core.bootstrap_scheduler().await.unwrap();
        assert!(TaskManager::scheduler_start(&core).await.is_err());
    }
}
