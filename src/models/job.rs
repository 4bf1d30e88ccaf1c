use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::request::GenerationRequest;

/// Status of a generation job.
///
/// Jobs only move forward: `Queued -> Running -> {Completed, Failed}`. A job
/// rejected at submission goes straight from `Queued` to `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[serde(alias = "IN_QUEUE")]
    Queued,
    #[serde(alias = "IN_PROGRESS")]
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` follows the job state graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

/// How a finished asset is handed back to the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryKind {
    /// A fetchable URL in object storage.
    Url,
    /// Base64-encoded asset bytes embedded in the status response.
    Inline,
}

/// The delivered output of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    pub delivery_kind: DeliveryKind,
    pub payload: String,
}

impl JobResult {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            delivery_kind: DeliveryKind::Url,
            payload: url.into(),
        }
    }

    pub fn inline(encoded: impl Into<String>) -> Self {
        Self {
            delivery_kind: DeliveryKind::Inline,
            payload: encoded.into(),
        }
    }
}

/// A generation job held in the node's in-memory job store.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// `None` when the submission was rejected before a request was built.
    pub request: Option<GenerationRequest>,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_regressions_and_terminal_exits_rejected() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
        assert_eq!(JobStatus::from_str("COMPLETED").unwrap(), JobStatus::Completed);
        assert_eq!(
            serde_json::to_string(&JobStatus::Queued).unwrap(),
            "\"QUEUED\""
        );
    }
}
