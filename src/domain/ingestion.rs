//! Ingestion job and task records.
//!
//! The task table is the durable queue: status writes are the single
//! source of truth for progress and survive process restarts. Retries
//! are modeled as a counter column rather than an in-process retry loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task that has failed this many times is terminal and excluded from
/// all future claims.
pub const MAX_TASK_RETRIES: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One ingestion run over a (brand, category URL) pair. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: i64,
    pub brand: String,
    pub category_url: String,
    pub status: JobStatus,
    pub total_tasks: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One PDP URL's worth of extraction work within a job.
///
/// Unique on (job_id, pdp_url), so re-seeding a job is a no-op for URLs
/// already queued. Retained after completion for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTask {
    pub id: i64,
    pub job_id: i64,
    pub pdp_url: String,
    pub status: TaskStatus,
    pub retries: i64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in [TaskStatus::Queued, TaskStatus::Running, TaskStatus::Done, TaskStatus::Error] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }
}
