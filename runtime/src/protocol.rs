//! Request and response envelopes for scrape calls.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::Credentials;
use crate::error::ScrapeError;
use crate::extraction::{ExtractionTask, GradesReport, ScoreEntry};

/// What the caller wants retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Score,
    Grades,
    Both,
    /// Liveness check: no browser or network work.
    Test,
}

impl Task {
    /// Reports implied by this task, or `None` for the liveness check.
    pub fn extraction(self) -> Option<ExtractionTask> {
        match self {
            Task::Score => Some(ExtractionTask::ScoreDetail),
            Task::Grades => Some(ExtractionTask::HistoricalGrades),
            Task::Both => Some(ExtractionTask::Both),
            Task::Test => None,
        }
    }
}

impl std::str::FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "score" => Ok(Task::Score),
            "grades" => Ok(Task::Grades),
            "both" => Ok(Task::Both),
            "test" => Ok(Task::Test),
            other => anyhow::bail!("unknown task: {other}"),
        }
    }
}

/// An incoming scrape request.
#[derive(Clone, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
    pub task: Task,
}

impl fmt::Debug for ScrapeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeRequest")
            .field("account", &"<redacted>")
            .field("password", &"<redacted>")
            .field("task", &self.task)
            .finish()
    }
}

impl ScrapeRequest {
    /// Credentials for a real task; blank fields are a client error.
    pub fn credentials(&self) -> Result<Credentials, ScrapeError> {
        if self.account.trim().is_empty() || self.password.is_empty() {
            return Err(ScrapeError::ClientInput);
        }
        Ok(Credentials::new(self.account.trim(), &self.password))
    }
}

/// Outcome class of a scrape call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    /// Classified authentication rejection.
    Failed,
    /// Any other fault.
    Error,
}

/// Aggregated reports, keyed by task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_task: Option<Vec<ScoreEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grades_task: Option<GradesReport>,
}

/// Response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ScrapeResults>,
}

impl ScrapeResponse {
    /// Acknowledgement for the liveness check.
    pub fn ack() -> Self {
        Self {
            status: Status::Success,
            message: Some("ok".to_string()),
            results: None,
        }
    }

    pub fn success(results: ScrapeResults) -> Self {
        Self {
            status: Status::Success,
            message: None,
            results: Some(results),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            message: Some(message.into()),
            results: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            results: None,
        }
    }
}
