//! Typed error hierarchy for the Service facade.
//!
//! Every [`TaskManager`](crate::service::TaskManager) method returns
//! `Result<T, ServiceError>`. [`ServiceError::status_code`] is the
//! transport-agnostic analogue of the gRPC status codes the original used;
//! `transport.rs` maps it onto an HTTP status, nothing upstream of it does.

use thiserror::Error;

/// Transport-agnostic status classification for a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unknown,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("task must be stopped before it can be modified")]
    TaskMustBeStopped,

    #[error("task is already started")]
    TaskAlreadyStarted,

    #[error("task is not running")]
    TaskNotRunning,

    #[error("task is already running")]
    AlreadyRunning,

    #[error("scheduler is already started")]
    SchedulerAlreadyStarted,

    #[error("scheduler is already stopped")]
    SchedulerAlreadyStopped,

    #[error("next task not found")]
    NextTaskNotFound,

    #[error("next task is enabled, a chained successor must be disabled")]
    NextTaskEnabled,

    #[error("failed to persist task registry: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[source] anyhow::Error),
}

impl ServiceError {
    /// Maps this error onto the transport-agnostic status classification
    /// named in spec.md §7 / §4.7.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::InvalidArgument,
            ServiceError::NotFound(_) => StatusCode::NotFound,
            ServiceError::TaskMustBeStopped
            | ServiceError::TaskAlreadyStarted
            | ServiceError::TaskNotRunning
            | ServiceError::AlreadyRunning
            | ServiceError::SchedulerAlreadyStarted
            | ServiceError::SchedulerAlreadyStopped
            | ServiceError::NextTaskNotFound
            | ServiceError::NextTaskEnabled => StatusCode::FailedPrecondition,
            ServiceError::Persistence(_) | ServiceError::ConfigLoad(_) => StatusCode::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_invalid_argument() {
        let err = ServiceError::Validation("bad name".into());
        assert_eq!(err.status_code(), StatusCode::InvalidArgument);
    }

    #[test]
    fn precondition_family_maps_correctly() {
        assert_eq!(
            ServiceError::TaskMustBeStopped.status_code(),
            StatusCode::FailedPrecondition
        );
        assert_eq!(
            ServiceError::AlreadyRunning.status_code(),
            StatusCode::FailedPrecondition
        );
        assert_eq!(
            ServiceError::NextTaskEnabled.status_code(),
            StatusCode::FailedPrecondition
        );
    }

    #[test]
    fn not_found_maps_correctly() {
        assert_eq!(
            ServiceError::NotFound("task").status_code(),
            StatusCode::NotFound
        );
    }
}
