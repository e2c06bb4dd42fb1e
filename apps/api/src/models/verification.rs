use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    Address,
    Identity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Reserved. No transition currently produces it.
    RequiresManualReview,
}

/// Four-point ordinal; declaration order is severity order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($ty), " '{}'"), other)),
                }
            }
        }
    };
}

text_enum!(CheckType {
    Address => "ADDRESS",
    Identity => "IDENTITY",
});

text_enum!(JobStatus {
    Pending => "PENDING",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Failed => "FAILED",
    RequiresManualReview => "REQUIRES_MANUAL_REVIEW",
});

text_enum!(RiskLevel {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::RequiresManualReview
        )
    }

    /// Jobs only move forward: PENDING -> IN_PROGRESS -> terminal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next != JobStatus::Pending,
            JobStatus::InProgress => next.is_terminal(),
            _ => false,
        }
    }
}

/// One asynchronous verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub location_id: Option<Uuid>,
    pub check_type: CheckType,
    pub status: JobStatus,
    pub risk_level: Option<RiskLevel>,
    pub check_data: Option<Value>,
    pub notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationJob {
    pub fn pending(user_id: Uuid, check_type: CheckType, location_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            location_id,
            check_type,
            status: JobStatus::Pending,
            risk_level: None,
            check_data: None,
            notes: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The single mutation applied to a stored job.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub check_data: Option<Value>,
    pub risk_level: Option<RiskLevel>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move job from {} to {}", self.from, self.to)
    }
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            check_data: None,
            risk_level: None,
            notes: None,
        }
    }

    pub fn completed(risk_level: RiskLevel, check_data: Value, notes: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            check_data: Some(check_data),
            risk_level: Some(risk_level),
            notes: Some(notes.into()),
        }
    }

    pub fn failed(notes: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            check_data: None,
            risk_level: Some(RiskLevel::High),
            notes: Some(notes.into()),
        }
    }

    /// Merges the provided fields into `job`; `completed_at` is stamped only on COMPLETED.
    pub fn apply_to(
        self,
        job: &mut VerificationJob,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        if !job.status.can_transition_to(self.status) {
            return Err(IllegalTransition {
                from: job.status,
                to: self.status,
            });
        }
        job.status = self.status;
        if let Some(data) = self.check_data {
            job.check_data = Some(data);
        }
        if let Some(risk) = self.risk_level {
            job.risk_level = Some(risk);
        }
        if let Some(notes) = self.notes {
            job.notes = Some(notes);
        }
        if self.status == JobStatus::Completed {
            job.completed_at = Some(now);
        }
        job.updated_at = now;
        Ok(())
    }
}
