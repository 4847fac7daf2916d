pub mod config;
pub mod conversation;
pub mod metrics;
pub mod presenter;
pub mod session;
pub mod template;
pub mod verification;
pub mod workflow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Invalid workflow definition `{workflow_id}`: {}", violations.join("; "))]
    InvalidDefinition {
        workflow_id: String,
        violations: Vec<String>,
    },
    #[error("Step `{step_id}` not found in workflow `{workflow_id}`")]
    StepNotFound { workflow_id: String, step_id: String },
    #[error("No transition matched after step `{step_id}` in workflow `{workflow_id}`")]
    UnresolvedTransition { workflow_id: String, step_id: String },
    #[error("Workflow `{workflow_id}` exceeded {limit} automatic steps at `{step_id}`")]
    WorkflowStuck {
        workflow_id: String,
        step_id: String,
        limit: usize,
    },
    #[error("Action `{action}` is not registered for workflow `{workflow_id}`")]
    UnknownAction { workflow_id: String, action: String },
    #[error("No active workflow for this session")]
    NoActiveWorkflow,
    #[error("Version conflict for session {session_key}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        session_key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors caused by an invalid graph or a runtime defect rather than by
    /// the user or a flaky service. These never get retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::WorkflowNotFound(_)
                | Error::InvalidDefinition { .. }
                | Error::StepNotFound { .. }
                | Error::UnresolvedTransition { .. }
                | Error::WorkflowStuck { .. }
                | Error::UnknownAction { .. }
                | Error::Config(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let stuck = Error::WorkflowStuck {
            workflow_id: "onboarding".to_string(),
            step_id: "poll".to_string(),
            limit: 25,
        };
        assert!(stuck.is_configuration());
        assert!(!stuck.is_transient());

        let conflict = Error::VersionConflict {
            session_key: "user-1".to_string(),
            expected: Some(3),
            found: Some(4),
        };
        assert!(conflict.is_transient());
        assert!(!conflict.is_configuration());
        assert!(!Error::NoActiveWorkflow.is_configuration());
    }

    #[test]
    fn test_invalid_definition_lists_violations() {
        let err = Error::InvalidDefinition {
            workflow_id: "onboarding".to_string(),
            violations: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Invalid workflow definition `onboarding`: a; b");
    }
}
