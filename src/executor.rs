//! Executor — process spawning, output streaming, cancellation/timeout and
//! task chaining.
//!
//! Grounded on `original_source/server/cron.go`: `taskJob`'s closure is the
//! admission-check → spawn → stream → wait → chain sequence reproduced here
//! as [`run_scheduled`]; `execCommand` is reproduced as [`run_ad_hoc`]. Pipe
//! reads use a fixed 2 KiB buffer read in a loop, the direct async analogue
//! of the original's blocking 2048-byte-buffer `parseStdErrOut` loop.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::events::{Event, EventKind};
use crate::service::Core;
use crate::task::Task;

const PIPE_READ_BUFFER_SIZE: usize = 2048;

/// Runs `task` under scheduler admission control: refuses to start a second
/// overlapping invocation (spec.md §4.2/§4.3 "skip if still running"),
/// streams stdout/stderr as events, honors the task's timeout, and on
/// success chains into `next_task` if one is configured.
///
/// This is the function installed as the cron callback by
/// [`crate::scheduler::Scheduler::install`], and is also what `TaskRun`
/// invokes for an on-demand run of a scheduled task.
pub async fn run_scheduled(core: Arc<Core>, uuid: String) {
    if core.run_states.contains(&uuid).await {
        emit(&core, &uuid, EventKind::Error, "alreadyRunning").await;
        return;
    }
    let Some(task) = core.registry.get(&uuid).await else {
        tracing::warn!("scheduled task {uuid} no longer exists, skipping run");
        return;
    };
    run_admitted(core, task).await;
}

/// Runs `task`, assuming the admission check has already passed (or is
/// intentionally skipped, as with a forced run). Shared by [`run_scheduled`]
/// and `Core::task_run`.
pub async fn run_admitted(core: Arc<Core>, task: Task) {
    let timeout = Duration::from_secs(task.timeout_secs);
    let state = core.run_states.admit(&task.uuid, timeout).await;

    emit(&core, &task.uuid, EventKind::Info, "started").await;

    let app_path = core
        .config
        .apps
        .get(&task.app)
        .cloned()
        .unwrap_or_else(|| task.app.clone());

    let mut command = Command::new(&app_path);
    command.args(&task.args);
    if let Some(dir) = &task.work_dir {
        if !dir.is_empty() {
            command.current_dir(dir);
        }
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            emit(&core, &task.uuid, EventKind::Error, format!("spawn failed: {e}")).await;
            core.run_states.remove(&task.uuid).await;
            return;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = spawn_pipe_reader(core.clone(), task.uuid.clone(), stdout, EventKind::Stdout);
    let stderr_task = spawn_pipe_reader(core.clone(), task.uuid.clone(), stderr, EventKind::Stderr);

    let outcome = tokio::select! {
        result = child.wait() => Outcome::Exited(result),
        _ = state.cancel.cancelled() => Outcome::Cancelled,
        _ = tokio::time::sleep_until(state.deadline) => Outcome::TimedOut,
    };

    if matches!(outcome, Outcome::Cancelled | Outcome::TimedOut) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    // `RunStateMap`'s entry for `task.uuid` is kept alive across the whole
    // chain lifetime (through `chain_next` below), exactly as the original's
    // `defer tasksCTX.cancel(uuid)` holds its context open across the inline
    // recursive call to the next task in the chain — it is only removed once
    // every successor this run triggers has itself finished.
    let mut should_chain = false;

    match outcome {
        Outcome::TimedOut => {
            emit(&core, &task.uuid, EventKind::Error, "taskContext:context deadline exceeded").await;
        }
        Outcome::Cancelled => {
            emit(&core, &task.uuid, EventKind::Error, "taskContext:context canceled").await;
        }
        Outcome::Exited(Ok(status)) => {
            let code = status.code().unwrap_or(-1);
            emit(&core, &task.uuid, EventKind::ExitStatus, format!("exit status {code}")).await;
            should_chain = status.success();
        }
        Outcome::Exited(Err(e)) => {
            emit(&core, &task.uuid, EventKind::Error, format!("wait failed: {e}")).await;
        }
    }

    if should_chain {
        chain_next(core.clone(), &task).await;
    }

    core.run_states.remove(&task.uuid).await;
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

/// On successful completion, follows `task.next_task` if configured: the
/// successor must be disabled (not independently scheduled), mirroring
/// `original_source/server/cron.go`'s `nextTaskEnabled` guard. Chaining
/// recurses through [`run_admitted`] directly rather than going back through
/// the scheduler, exactly as the original inlines the next call within the
/// same goroutine and context lifetime.
async fn chain_next(core: Arc<Core>, task: &Task) {
    let Some(next_uuid) = task.next_task.as_ref().filter(|u| !u.is_empty()) else {
        emit(&core, &task.uuid, EventKind::Info, "done").await;
        return;
    };
    let Some(next_task) = core.registry.get(next_uuid).await else {
        emit(&core, &task.uuid, EventKind::Error, "nextTaskNotFound").await;
        return;
    };
    if next_task.enabled {
        emit(&core, &task.uuid, EventKind::Error, "nextTaskEnabled").await;
        return;
    }
    emit(&core, &task.uuid, EventKind::Info, "done").await;
    Box::pin(run_admitted(core, next_task)).await;
}

/// Runs `task` outside of `RunStateMap` and cron entirely, capturing
/// combined output rather than streaming it, for ad-hoc one-off execution
/// via `ExecCmd`. Mirrors `original_source/server/cron.go::execCommand`.
pub async fn run_ad_hoc(app_path: &str, args: &[String], timeout: Duration) -> ExecResult {
    let mut command = Command::new(app_path);
    command.args(args);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                success: false,
                message: Some(format!("spawn failed: {e}")),
            }
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            message: None,
        },
        Ok(Err(e)) => ExecResult {
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            message: Some(format!("wait failed: {e}")),
        },
        Err(_) => ExecResult {
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            message: Some("taskContext:context deadline exceeded".to_string()),
        },
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub message: Option<String>,
}

fn spawn_pipe_reader<R>(
    core: Arc<Core>,
    uuid: String,
    pipe: Option<R>,
    kind: EventKind,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut buf = [0u8; PIPE_READ_BUFFER_SIZE];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    if !chunk.is_empty() {
                        emit(&core, &uuid, kind, chunk.into_owned()).await;
                    }
                }
                Err(e) => {
                    emit(&core, &uuid, EventKind::Error, format!("pipe read error: {e}")).await;
                    break;
                }
            }
        }
    })
}

pub(crate) async fn emit(core: &Core, uuid: &str, kind: EventKind, message: impl Into<String>) {
    let (name, tags) = match core.registry.get(uuid).await {
        Some(task) => (task.name, task.tags),
        None => (String::new(), String::new()),
    };
    core.event_bus
        .publish(Event::new(name, tags, uuid, kind, message))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ad_hoc_run_captures_stdout() {
        let result = run_ad_hoc(
            "/bin/echo",
            &["hello".to_string()],
            Duration::from_secs(5),
        )
        .await;
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn ad_hoc_run_times_out() {
        let result = run_ad_hoc(
            "/bin/sleep",
            &["5".to_string()],
            Duration::from_millis(50),
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("taskContext:context deadline exceeded"));
    }
}
