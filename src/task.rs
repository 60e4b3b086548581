//! The `Task` record and its validation rules.
//!
//! Grounded on `original_source/server/tasks.go`'s `validateInput`/
//! `validateUUID` and on `own-ai-app`'s `scheduler/mod.rs::ScheduledTask`
//! (field shape) and `validate_cron_expression` (cron parsing via `croner`).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

const NAME_MAX_LEN: usize = 128;
const DESCRIPTION_MAX_LEN: usize = 256;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_ ]+$").expect("static regex"));
static DESCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_ ]*$").expect("static regex"));
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("static regex")
});

/// A registered, schedulable unit of work.
///
/// `cron_id` is `0` when the task is not currently installed in the
/// scheduler (disabled, or enabled but not yet started) — the same
/// zero-means-absent convention `original_source/server/tasks.go` uses for
/// its `CronId` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form metadata propagated into every `Event` this task emits.
    #[serde(default)]
    pub tags: String,
    pub schedule: String,
    pub app: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory override; `None` means "the app's configured dir".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    pub timeout_secs: u64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cron_id: u64,
    /// uuid of the task to chain into on success; `None` for no chaining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_task: Option<String>,
}

impl Task {
    /// Validates a task record against the rules
    /// `original_source/server/tasks.go::validateInput` enforces, plus the
    /// "app must exist in config" cross-check.
    ///
    /// `existing_uuids` is used to validate `next_task` references an actual
    /// task; it is not used to check uniqueness of `self.uuid`, which the
    /// registry enforces at insertion time.
    pub fn validate(&self, apps: &HashMap<String, String>) -> Result<(), ServiceError> {
        if self.name.is_empty() || self.name.len() > NAME_MAX_LEN || !NAME_RE.is_match(&self.name)
        {
            return Err(ServiceError::Validation(format!(
                "name must be 1-{NAME_MAX_LEN} chars of letters, digits, underscore and space"
            )));
        }
        if self.description.len() > DESCRIPTION_MAX_LEN || !DESCRIPTION_RE.is_match(&self.description)
        {
            return Err(ServiceError::Validation(format!(
                "description must be at most {DESCRIPTION_MAX_LEN} chars of letters, digits, underscore and space"
            )));
        }
        self.schedule
            .parse::<croner::Cron>()
            .map_err(|e| ServiceError::Validation(format!("invalid cron schedule: {e}")))?;
        if self.timeout_secs < 1 {
            return Err(ServiceError::Validation(
                "timeout must be at least 1 second".into(),
            ));
        }
        if !apps.contains_key(&self.app) {
            return Err(ServiceError::Validation(format!(
                "app '{}' is not registered in config",
                self.app
            )));
        }
        if let Some(next) = &self.next_task {
            if !next.is_empty() && !UUID_RE.is_match(next) {
                return Err(ServiceError::Validation("next_task is not a valid uuid".into()));
            }
        }
        Ok(())
    }
}

/// Validates a uuid string looks like `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub fn is_valid_uuid(s: &str) -> bool {
    UUID_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("echo".to_string(), "/bin/echo".to_string());
        m
    }

    fn base_task() -> Task {
        Task {
            uuid: "b3b3b3b3-0000-0000-0000-000000000000".into(),
            name: "daily backup".into(),
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

    #[test]
    fn accepts_a_well_formed_task() {
        assert!(base_task().validate(&apps()).is_ok());
    }

    #[test]
    fn rejects_name_with_disallowed_characters() {
        let mut t = base_task();
        t.name = "backup!".into();
        assert!(t.validate(&apps()).is_err());
    }

    #[test]
    fn rejects_empty_name() {
        let mut t = base_task();
        t.name = String::new();
        assert!(t.validate(&apps()).is_err());
    }

    #[test]
    fn rejects_bad_cron_expression() {
        let mut t = base_task();
        t.schedule = "not a cron".into();
        assert!(t.validate(&apps()).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut t = base_task();
        t.timeout_secs = 0;
        assert!(t.validate(&apps()).is_err());
    }

    #[test]
    fn rejects_unknown_app() {
        let mut t = base_task();
        t.app = "ghost".into();
        assert!(t.validate(&apps()).is_err());
    }

    #[test]
    fn rejects_malformed_next_task_uuid() {
        let mut t = base_task();
        t.next_task = Some("not-a-uuid".into());
        assert!(t.validate(&apps()).is_err());
    }

    #[test]
    fn uuid_validator_matches_rfc4122_text_form() {
        assert!(is_valid_uuid("b3b3b3b3-0000-0000-0000-000000000000"));
        assert!(!is_valid_uuid("short"));
    }
}
