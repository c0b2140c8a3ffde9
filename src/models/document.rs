//! Document model and processing status.
//!
//! One `Document` per uploaded artifact. The status advances monotonically
//! along `uploaded -> queued -> processing -> {done | error}`; the only
//! backward move is an explicit re-enqueue, which resets to `queued` and
//! clears the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Queued,
    Processing,
    Done,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Position along the lifecycle. Terminal states share a rank.
    fn rank(&self) -> u8 {
        match self {
            Self::Uploaded => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Done | Self::Error => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether an ordinary (non-re-enqueue) transition to `next` is allowed.
    pub fn can_advance_to(&self, next: DocumentStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One uploaded artifact and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Database row id, assigned at creation.
    pub id: i64,
    /// Original (sanitized) filename; also the key under the raw storage area.
    pub filename: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Inference output. Present iff `status == Done`.
    pub result_json: Option<String>,
}

impl Document {
    /// Whether a result payload may be served for this document.
    pub fn has_result(&self) -> bool {
        self.status == DocumentStatus::Done
            && self.result_json.as_deref().is_some_and(|r| !r.is_empty())
    }
}
