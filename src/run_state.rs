//! `RunStateMap` — presence of an entry for a task uuid *is* the lock that
//! marks a task as currently running, per spec.md §3/§4.3.
//!
//! Grounded on `original_source/server/syncCtxMap.go`'s `tTasksCtxMap`: `add`
//! derives a deadline from the timeout and installs a cancel handle,
//! `cancel` both fires the cancellation and removes the entry in one
//! operation. `tokio_util::sync::CancellationToken` plus
//! `tokio::time::Instant` replace Go's `context.WithTimeout` one-for-one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A running task's cancellation handle and deadline.
#[derive(Clone)]
pub struct RunState {
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

impl RunState {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Tracks which tasks currently have an in-flight execution.
#[derive(Default)]
pub struct RunStateMap {
    inner: RwLock<HashMap<String, RunState>>,
}

impl RunStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `uuid` as running with the given timeout, returning the new
    /// [`RunState`]. Callers must check [`RunStateMap::get`] first — this
    /// method does not itself refuse a duplicate admission, matching the
    /// original's `add` (the duplicate check lives in the caller, exactly as
    /// `original_source/server/cron.go::taskJob` checks
    /// `tasksCTX.get(uuid) != nil` before ever calling `add`).
    pub async fn admit(&self, uuid: &str, timeout: Duration) -> RunState {
        let state = RunState {
            cancel: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        };
        self.inner
            .write()
            .await
            .insert(uuid.to_string(), state.clone());
        state
    }

    pub async fn get(&self, uuid: &str) -> Option<RunState> {
        self.inner.read().await.get(uuid).cloned()
    }

    pub async fn contains(&self, uuid: &str) -> bool {
        self.inner.read().await.contains_key(uuid)
    }

    /// Removes the entry for `uuid`, marking the task as no longer running.
    /// Called unconditionally when an execution finishes, and explicitly by
    /// a forced cancel.
    pub async fn remove(&self, uuid: &str) {
        self.inner.write().await.remove(uuid);
    }

    /// Cancels and removes `uuid` in one step, the combined operation
    /// `original_source/server/syncCtxMap.go::cancel` performs.
    pub async fn cancel(&self, uuid: &str) -> bool {
        if let Some(state) = self.inner.write().await.remove(uuid) {
            state.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub async fn running_uuids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admit_makes_task_visible_as_running() {
        let map = RunStateMap::new();
        assert!(!map.contains("t1").await);
        map.admit("t1", Duration::from_secs(10)).await;
        assert!(map.contains("t1").await);
    }

    #[tokio::test]
    async fn cancel_fires_token_and_clears_entry() {
        let map = RunStateMap::new();
        let state = map.admit("t1", Duration::from_secs(10)).await;
        assert!(map.cancel("t1").await);
        assert!(state.cancel.is_cancelled());
        assert!(!map.contains("t1").await);
    }

    #[tokio::test]
    async fn cancel_on_absent_uuid_is_a_no_op() {
        let map = RunStateMap::new();
        assert!(!map.cancel("ghost").await);
    }

    #[tokio::test]
    async fn remove_clears_without_cancelling() {
        let map = RunStateMap::new();
        let state = map.admit("t1", Duration::from_secs(10)).await;
        map.remove("t1").await;
        assert!(!state.cancel.is_cancelled());
        assert!(!map.contains("t1").await);
    }
}
