use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::verification::{JobStatus, RiskLevel, VerificationJob};
use crate::store::JobStore;

/// A user's worst-case-dominant risk posture across every check they have had.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub user_id: Uuid,
    pub overall_risk: RiskLevel,
    pub completed_checks: usize,
    pub pending_checks: usize,
    pub failed_checks: usize,
}

/// Read-only view over the job history.
#[derive(Clone)]
pub struct RiskAggregator {
    jobs: Arc<dyn JobStore>,
}

impl RiskAggregator {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    pub async fn assess_user(&self, user_id: Uuid) -> Result<RiskAssessment, AppError> {
        let jobs = self.jobs.list_for_user(user_id).await?;
        Ok(aggregate(user_id, &jobs))
    }
}

/// Any FAILED job → HIGH. Otherwise, over COMPLETED jobs: CRITICAL beats HIGH,
/// and only a unanimous LOW set is LOW. Everything else, including no
/// completed jobs at all, is MEDIUM.
///
/// REQUIRES_MANUAL_REVIEW jobs fall in none of the buckets.
pub fn aggregate(user_id: Uuid, jobs: &[VerificationJob]) -> RiskAssessment {
    let completed: Vec<Option<RiskLevel>> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .map(|j| j.risk_level)
        .collect();
    let pending_checks = jobs
        .iter()
        .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::InProgress))
        .count();
    let failed_checks = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .count();

    let overall_risk = if failed_checks > 0 {
        RiskLevel::High
    } else if completed.contains(&Some(RiskLevel::Critical)) {
        RiskLevel::Critical
    } else if completed.contains(&Some(RiskLevel::High)) {
        RiskLevel::High
    } else if !completed.is_empty() && completed.iter().all(|r| *r == Some(RiskLevel::Low)) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    };

    RiskAssessment {
        user_id,
        overall_risk,
        completed_checks: completed.len(),
        pending_checks,
        failed_checks,
    }
}
