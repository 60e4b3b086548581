//! `TaskRegistry` — the persisted collection of [`Task`] records.
//!
//! Grounded on `original_source/server/tasks.go`'s `tTasks`: `load` creates
//! the file if absent then validates every record, `create`/`update`/
//! `delete` enforce the "must be stopped" precondition, and `start`/`stop`
//! manage the `cron_id` field. The `sync.RWMutex` guarding a `[]*pb.Task` is
//! generalized to `tokio::sync::RwLock<Vec<Task>>` per SPEC_FULL.md §4.1,
//! since every mutator here awaits the atomic-rewrite persistence call.
//!
//! Persistence is a crash-safe temp-file-then-rename instead of the
//! original's direct `os.WriteFile`, while keeping the fatal-on-failure
//! semantics spec.md §3/§7 requires: a write failure comes back as
//! `ServiceError::Persistence` and callers (the `schedulerd` binary) treat it
//! as fatal, never as a soft RPC failure.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::task::Task;

pub struct TaskRegistry {
    path: PathBuf,
    tasks: RwLock<Vec<Task>>,
}

impl TaskRegistry {
    /// Loads the registry from `path`, creating an empty file if it does not
    /// exist yet, and validating every stored record against `apps`.
    pub async fn load(path: PathBuf, apps: &HashMap<String, String>) -> Result<Self, ServiceError> {
        if !path.exists() {
            tokio::fs::write(&path, "[]\n")
                .await
                .map_err(ServiceError::Persistence)?;
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(ServiceError::Persistence)?;
        let tasks: Vec<Task> = serde_yaml::from_str(&raw)
            .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("parsing tasks file: {e}")))?;
        for task in &tasks {
            task.validate(apps)?;
        }
        Ok(TaskRegistry {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    /// Rewrites the entire task file atomically: serialize to a temp file in
    /// the same directory, then rename over the target. A rename within one
    /// filesystem is atomic, so a crash mid-write can never leave
    /// `tasks.yaml` truncated or corrupt.
    async fn persist(&self, tasks: &[Task]) -> Result<(), ServiceError> {
        let serialized = serde_yaml::to_string(tasks)
            .map_err(|e| ServiceError::ConfigLoad(anyhow::anyhow!("serializing tasks: {e}")))?;
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let tmp_path = dir.join(format!(".{}.tmp-{}", file_stem(&self.path), Uuid::new_v4()));
        tokio::fs::write(&tmp_path, serialized.as_bytes())
            .await
            .map_err(ServiceError::Persistence)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(ServiceError::Persistence)?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    pub async fn get(&self, uuid: &str) -> Option<Task> {
        self.tasks.read().await.iter().find(|t| t.uuid == uuid).cloned()
    }

    /// Creates a new task. A fresh uuid is assigned and `enabled`/`cron_id`
    /// are forced to disabled/absent regardless of the caller's input,
    /// matching `original_source/server/tasks.go::create`.
    pub async fn create(
        &self,
        mut task: Task,
        apps: &HashMap<String, String>,
    ) -> Result<Task, ServiceError> {
        task.uuid = Uuid::new_v4().to_string();
        task.enabled = false;
        task.cron_id = 0;
        task.validate(apps)?;
        let mut guard = self.tasks.write().await;
        guard.push(task.clone());
        self.persist(&guard).await?;
        Ok(task)
    }

    /// Replaces an existing task's editable fields. Refuses if the task is
    /// currently installed in the scheduler (`cron_id != 0`) or enabled —
    /// it must be stopped first, per spec.md §4.1.
    pub async fn update(
        &self,
        uuid: &str,
        updated: Task,
        apps: &HashMap<String, String>,
    ) -> Result<Task, ServiceError> {
        let mut guard = self.tasks.write().await;
        let idx = guard
            .iter()
            .position(|t| t.uuid == uuid)
            .ok_or(ServiceError::NotFound("task"))?;
        if guard[idx].cron_id != 0 || guard[idx].enabled {
            return Err(ServiceError::TaskMustBeStopped);
        }
        let mut new_task = updated;
        new_task.uuid = uuid.to_string();
        new_task.enabled = false;
        new_task.cron_id = 0;
        new_task.validate(apps)?;
        guard[idx] = new_task.clone();
        self.persist(&guard).await?;
        Ok(new_task)
    }

    pub async fn delete(&self, uuid: &str) -> Result<(), ServiceError> {
        let mut guard = self.tasks.write().await;
        let idx = guard
            .iter()
            .position(|t| t.uuid == uuid)
            .ok_or(ServiceError::NotFound("task"))?;
        if guard[idx].cron_id != 0 || guard[idx].enabled {
            return Err(ServiceError::TaskMustBeStopped);
        }
        guard.remove(idx);
        self.persist(&guard).await?;
        Ok(())
    }

    /// Marks a task enabled, assigning the `cron_id` the [`crate::scheduler::Scheduler`]
    /// handed back after installing its cron job.
    pub async fn mark_started(&self, uuid: &str, cron_id: u64) -> Result<(), ServiceError> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .iter_mut()
            .find(|t| t.uuid == uuid)
            .ok_or(ServiceError::NotFound("task"))?;
        if task.cron_id != 0 {
            return Err(ServiceError::TaskAlreadyStarted);
        }
        task.enabled = true;
        task.cron_id = cron_id;
        self.persist(&guard).await?;
        Ok(())
    }

    /// Marks a task disabled and clears its `cron_id`, used when the
    /// scheduler removes a task's cron entry (on `stop`/`SchedulerStop`).
    pub async fn mark_stopped(&self, uuid: &str) -> Result<(), ServiceError> {
        let mut guard = self.tasks.write().await;
        let task = guard
            .iter_mut()
            .find(|t| t.uuid == uuid)
            .ok_or(ServiceError::NotFound("task"))?;
        task.enabled = false;
        task.cron_id = 0;
        self.persist(&guard).await?;
        Ok(())
    }

    /// Clears every task's `cron_id`/`enabled` flag without touching the
    /// scheduler itself — used by `SchedulerStop` once every cron entry has
    /// already been removed.
    pub async fn reset_all_cron_ids(&self) -> Result<(), ServiceError> {
        let mut guard = self.tasks.write().await;
        for task in guard.iter_mut() {
            task.enabled = false;
            task.cron_id = 0;
        }
        self.persist(&guard).await
    }
}

fn file_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tasks")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("echo".to_string(), "/bin/echo".to_string());
        m
    }

    fn sample_task() -> Task {
        Task {
            uuid: String::new(),
            name: "sample".into(),
            description: String::new(),
            tags: String::new(),
            schedule: "0 0 * * *".into(),
            app: "echo".into(),
            args: vec![],
            work_dir: None,
            timeout_secs: 30,
            enabled: false,
            cron_id: 0,
            next_task: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_uuid_and_forces_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        let registry = TaskRegistry::load(path, &apps()).await.unwrap();
        let mut task = sample_task();
        task.enabled = true;
        task.cron_id = 7;
        let created = registry.create(task, &apps()).await.unwrap();
        assert!(!created.uuid.is_empty());
        assert!(!created.enabled);
        assert_eq!(created.cron_id, 0);
    }

    #[tokio::test]
    async fn update_refuses_running_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        let registry = TaskRegistry::load(path, &apps()).await.unwrap();
        let created = registry.create(sample_task(), &apps()).await.unwrap();
        registry.mark_started(&created.uuid, 1).await.unwrap();
        let err = registry
            .update(&created.uuid, sample_task(), &apps())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TaskMustBeStopped));
    }

    #[tokio::test]
    async fn delete_removes_stopped_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        let registry = TaskRegistry::load(path, &apps()).await.unwrap();
        let created = registry.create(sample_task(), &apps()).await.unwrap();
        registry.delete(&created.uuid).await.unwrap();
        assert!(registry.get(&created.uuid).await.is_none());
    }

    #[tokio::test]
    async fn persisted_registry_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        let registry = TaskRegistry::load(path.clone(), &apps()).await.unwrap();
        registry.create(sample_task(), &apps()).await.unwrap();
        let reloaded = TaskRegistry::load(path, &apps()).await.unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
    }

    #[tokio::test]
    async fn mark_started_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        let registry = TaskRegistry::load(path, &apps()).await.unwrap();
        let created = registry.create(sample_task(), &apps()).await.unwrap();
        registry.mark_started(&created.uuid, 1).await.unwrap();
        let err = registry.mark_started(&created.uuid, 2).await.unwrap_err();
        assert!(matches!(err, ServiceError::TaskAlreadyStarted));
    }
}
