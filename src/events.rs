//! `Event`, the EventBus fan-out pump, the SubscriberMap and the FileLogger.
//!
//! The EventBus shape (one bounded producer channel, one pump task, fan-out
//! to a file sink plus N subscriber channels with producer-side backpressure
//! on a slow subscriber) is named in spec.md §4.4; no teacher file covers an
//! event bus directly so the channel choice is grounded on the
//! `async-channel` MPMC crate used elsewhere in the retrieval pack, and the
//! daily-rotated YAML log file is carried over from
//! `original_source/server/fileLogger.go`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// EventBus producer-side channel capacity, matching
/// `original_source/server/service.go`'s `taskLog` channel capacity of 100.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

const LOG_FILE_PREFIX: &str = "log_";
const LOG_FILE_SUFFIX: &str = ".yaml";
const LOG_FILE_DATE_FMT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Info,
    Error,
    Stdout,
    Stderr,
    ExitStatus,
    Sys,
}

/// A single occurrence emitted by the scheduler or executor, fanned out to
/// the file log and to every live subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub tags: String,
    pub uuid: String,
    pub message: String,
    pub kind: EventKind,
    pub timestamp_micros: i64,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        tags: impl Into<String>,
        uuid: impl Into<String>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Self {
        Event {
            name: name.into(),
            tags: tags.into(),
            uuid: uuid.into(),
            message: message.into(),
            kind,
            timestamp_micros: Utc::now().timestamp_micros(),
        }
    }
}

/// Registry of live SSE/watch subscribers.
///
/// Mirrors `own-ai-app`'s `scheduler/mod.rs::Scheduler::job_ids`
/// (`HashMap<String, Uuid>`) shape, generalized to an async `RwLock` since
/// subscribers attach and detach from concurrent request handlers rather
/// than a single owner.
#[derive(Default)]
pub struct SubscriberMap {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<Event>>>,
}

impl SubscriberMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its id plus the receiving end
    /// of its channel.
    pub async fn subscribe(&self, buffer: usize) -> (Uuid, mpsc::Receiver<Event>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().await.remove(&id);
    }

    /// Fans `event` out to every live subscriber. A subscriber whose channel
    /// is full blocks this call until it drains — "a slow subscriber
    /// throttles the producer", as spec.md §4.4 specifies — and a closed
    /// subscriber is dropped from the map.
    pub async fn broadcast(&self, event: &Event) {
        let senders: Vec<(Uuid, mpsc::Sender<Event>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        let mut dead = Vec::new();
        for (id, tx) in senders {
            if tx.send(event.clone()).await.is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut guard = self.subscribers.write().await;
            for id in dead {
                guard.remove(&id);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Appends events to a daily-rotated YAML log file and prunes old files.
///
/// Grounded on `original_source/server/fileLogger.go`: filename format
/// `log_YYYYMMDD.yaml`, reopen-on-day-change, and retention pruning only
/// when `log_limit >= 1` (negative/zero disables pruning).
pub struct FileLogger {
    folder: PathBuf,
    log_limit: i64,
    current_date: tokio::sync::Mutex<Option<(String, tokio::fs::File)>>,
}

impl FileLogger {
    pub fn new(folder: impl Into<PathBuf>, log_limit: i64) -> Self {
        FileLogger {
            folder: folder.into(),
            log_limit,
            current_date: tokio::sync::Mutex::new(None),
        }
    }

    fn file_name_for(date: &str) -> String {
        format!("{LOG_FILE_PREFIX}{date}{LOG_FILE_SUFFIX}")
    }

    /// Appends a single event as a YAML document to today's log file,
    /// rotating to a new file if the day has changed since the last write.
    pub async fn append(&self, event: &Event) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.folder).await?;
        let today = Utc::now().format(LOG_FILE_DATE_FMT).to_string();

        let mut guard = self.current_date.lock().await;
        let needs_reopen = match &*guard {
            Some((date, _)) => date != &today,
            None => true,
        };
        if needs_reopen {
            let path = self.folder.join(Self::file_name_for(&today));
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            *guard = Some((today.clone(), file));
            self.prune(&today).await;
        }

        let (_, file) = guard.as_mut().expect("just opened above");
        let doc = serde_yaml::to_string(event)?;
        use tokio::io::AsyncWriteExt;
        file.write_all(b"---\n").await?;
        file.write_all(doc.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Deletes the oldest rotated log files beyond `log_limit`, run in the
    /// background exactly as `original_source`'s `deleteTasksLogFiles` is
    /// spawned as a detached goroutine on each rotation.
    async fn prune(&self, except_today: &str) {
        if self.log_limit < 1 {
            return;
        }
        let folder = self.folder.clone();
        let limit = self.log_limit as usize;
        let except = except_today.to_string();
        tokio::spawn(async move {
            if let Err(e) = prune_log_files(&folder, limit, &except).await {
                tracing::warn!("failed to prune old log files: {e}");
            }
        });
    }

    pub async fn read_range(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> anyhow::Result<Vec<Event>> {
        let mut names = list_log_files(&self.folder).await?;
        names.sort();
        let mut events = Vec::new();
        for name in names {
            let date = extract_date(&name).unwrap_or_default();
            if let Some(from) = from {
                if date.as_str() < from {
                    continue;
                }
            }
            if let Some(to) = to {
                if date.as_str() > to {
                    continue;
                }
            }
            let path = self.folder.join(&name);
            let contents = tokio::fs::read_to_string(&path).await?;
            for doc in contents.split("---\n").filter(|s| !s.trim().is_empty()) {
                if let Ok(event) = serde_yaml::from_str::<Event>(doc) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }
}

fn extract_date(file_name: &str) -> Option<String> {
    file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)
        .map(|s| s.to_string())
}

async fn list_log_files(folder: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(LOG_FILE_PREFIX) && name.ends_with(LOG_FILE_SUFFIX) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

async fn prune_log_files(folder: &Path, limit: usize, except_today: &str) -> anyhow::Result<()> {
    let mut names = list_log_files(folder).await?;
    names.sort();
    let today_name = FileLogger::file_name_for(except_today);
    names.retain(|n| n != &today_name);
    if names.len() <= limit.saturating_sub(1) {
        return Ok(());
    }
    let excess = names.len() - limit.saturating_sub(1).max(0);
    for name in names.into_iter().take(excess) {
        let path = folder.join(name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("failed to remove old log file {}: {e}", path.display());
        }
    }
    Ok(())
}

/// Owns the single receiving end of the event channel and pumps every event
/// to the [`FileLogger`] and the [`SubscriberMap`] in submission order.
pub struct EventBus {
    sender: async_channel::Sender<Event>,
}

impl EventBus {
    /// Spawns the pump task and returns a handle whose `sender` is the only
    /// way producers publish events.
    pub fn spawn(file_logger: Arc<FileLogger>, subscribers: Arc<SubscriberMap>) -> Self {
        let (tx, rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Err(e) = file_logger.append(&event).await {
                    tracing::warn!("failed to append event to log file: {e}");
                }
                subscribers.broadcast(&event).await;
            }
        });
        EventBus { sender: tx }
    }

    pub fn sender(&self) -> async_channel::Sender<Event> {
        self.sender.clone()
    }

    pub async fn publish(&self, event: Event) {
        if self.sender.send(event).await.is_err() {
            tracing::error!("event bus pump has shut down, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_broadcast_events() {
        let map = SubscriberMap::new();
        let (id, mut rx) = map.subscribe(8).await;
        let event = Event::new("task", "", "u-1", EventKind::Info, "started");
        map.broadcast(&event).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "started");
        map.unsubscribe(id).await;
        assert_eq!(map.len().await, 0);
    }

    #[tokio::test]
    async fn file_logger_appends_and_reads_back_events() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FileLogger::new(dir.path(), -1);
        let event = Event::new("task", "nightly", "u-1", EventKind::Stdout, "hello");
        logger.append(&event).await.unwrap();
        let events = logger.read_range(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "hello");
    }

    #[tokio::test]
    async fn event_bus_fans_out_to_subscriber_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(FileLogger::new(dir.path(), -1));
        let subs = Arc::new(SubscriberMap::new());
        let (_id, mut rx) = subs.subscribe(8).await;
        let bus = EventBus::spawn(logger.clone(), subs.clone());
        bus.publish(Event::new("task", "", "u-1", EventKind::Info, "hi"))
            .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "hi");
    }
}
