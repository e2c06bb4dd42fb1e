//! Check orchestration. Creates verification jobs and drives each one through
//! PENDING → IN_PROGRESS → COMPLETED | FAILED on a background task.
//!
//! Initiation returns as soon as the PENDING row is stored. The provider call runs
//! on its own tokio task and never blocks the request that triggered it. A provider
//! error, timeout or panic is recorded on the job as FAILED/HIGH; it is never
//! surfaced to the original caller and never retried.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::geo::GeoIndex;
use crate::models::location::Location;
use crate::models::verification::{CheckType, JobStatus, JobUpdate, RiskLevel, VerificationJob};
use crate::store::JobStore;
use crate::verification::policy::{
    address_risk, assess_completeness, identity_risk, CompletenessTier,
};
use crate::verification::provider::{
    AddressCheckRequest, IdentityCheckRequest, ProviderError, ProviderOutcome,
    VerificationProvider,
};

/// What the background task needs to run one check.
#[derive(Debug, Clone)]
enum CheckInput {
    /// Location as it was when the check was requested.
    Address(Location),
    Identity(Value),
}

/// A freshly created job plus the handle of its background task.
pub struct Initiated {
    pub job: VerificationJob,
    #[allow(dead_code)]
    pub task: JoinHandle<()>,
}

/// The terminal payload of a successful check.
#[derive(Debug, Clone)]
struct Finding {
    risk: RiskLevel,
    data: Value,
    notes: String,
    /// The snapshot that matched, to be marked verified.
    matched_location: Option<Location>,
}

#[derive(Clone)]
pub struct CheckOrchestrator {
    jobs: Arc<dyn JobStore>,
    geo: GeoIndex,
    provider: Arc<dyn VerificationProvider>,
    timeout: Option<Duration>,
}

impl CheckOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        geo: GeoIndex,
        provider: Arc<dyn VerificationProvider>,
    ) -> Self {
        Self {
            jobs,
            geo,
            provider,
            timeout: None,
        }
    }

    /// Bounds the provider step; an elapsed timer fails the job.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn initiate_address_verification(
        &self,
        user_id: Uuid,
    ) -> Result<VerificationJob, AppError> {
        Ok(self.begin_address_verification(user_id).await?.job)
    }

    pub async fn initiate_identity_verification(
        &self,
        user_id: Uuid,
        payload: Value,
    ) -> Result<VerificationJob, AppError> {
        Ok(self.begin_identity_verification(user_id, payload).await?.job)
    }

    pub async fn begin_address_verification(&self, user_id: Uuid) -> Result<Initiated, AppError> {
        let location = self.geo.get_current_location(user_id).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "Cannot verify address without a location on file for user {user_id}"
            ))
        })?;

        let job = VerificationJob::pending(user_id, CheckType::Address, Some(location.id));
        self.schedule(job, CheckInput::Address(location)).await
    }

    pub async fn begin_identity_verification(
        &self,
        user_id: Uuid,
        payload: Value,
    ) -> Result<Initiated, AppError> {
        let job = VerificationJob::pending(user_id, CheckType::Identity, None);
        self.schedule(job, CheckInput::Identity(payload)).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<VerificationJob>, AppError> {
        self.jobs.get(id).await
    }

    pub async fn list_jobs_for_user(&self, user_id: Uuid) -> Result<Vec<VerificationJob>, AppError> {
        self.jobs.list_for_user(user_id).await
    }

    /// The only way a job changes. Merges the fields the update carries;
    /// `completed_at` is stamped when the new status is COMPLETED.
    pub async fn update_job_status(
        &self,
        id: Uuid,
        update: JobUpdate,
    ) -> Result<VerificationJob, AppError> {
        let job = self.jobs.update(id, update).await?;
        info!("Job {id} ({}) is now {}", job.check_type, job.status);
        Ok(job)
    }

    async fn schedule(&self, job: VerificationJob, input: CheckInput) -> Result<Initiated, AppError> {
        let job = self.jobs.insert(job).await?;
        info!(
            "Queued {} verification job {} for user {}",
            job.check_type, job.id, job.user_id
        );

        let this = self.clone();
        let (job_id, user_id) = (job.id, job.user_id);
        let task = tokio::spawn(async move { this.run(job_id, user_id, input).await });

        Ok(Initiated { job, task })
    }

    async fn run(&self, job_id: Uuid, user_id: Uuid, input: CheckInput) {
        if let Err(e) = self
            .update_job_status(job_id, JobUpdate::status(JobStatus::InProgress))
            .await
        {
            error!("Could not start verification job {job_id}: {e}");
            self.record_failure(job_id, format!("Verification could not start: {e}"))
                .await;
            return;
        }

        match self.evaluate_isolated(job_id, user_id, input).await {
            Ok(finding) => {
                let update = JobUpdate::completed(finding.risk, finding.data, finding.notes);
                if let Err(e) = self.update_job_status(job_id, update).await {
                    error!("Could not record result of verification job {job_id}: {e}");
                    self.record_failure(
                        job_id,
                        format!("Verification result could not be recorded: {e}"),
                    )
                    .await;
                    return;
                }
                if let Some(checked) = finding.matched_location {
                    if let Err(e) = self.geo.mark_checked_verified(&checked).await {
                        warn!("Job {job_id} matched but location could not be marked verified: {e}");
                    }
                }
            }
            Err(e) => {
                warn!("Verification job {job_id} failed: {e}");
                self.record_failure(job_id, format!("Verification failed: {e}"))
                    .await;
            }
        }
    }

    async fn record_failure(&self, job_id: Uuid, notes: String) {
        if let Err(e) = self
            .update_job_status(job_id, JobUpdate::failed(notes))
            .await
        {
            error!("Could not record failure of verification job {job_id}: {e}");
        }
    }

    /// Runs the check on its own task so a panic or an elapsed timeout comes
    /// back as an error instead of taking the job runner down with it.
    async fn evaluate_isolated(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        input: CheckInput,
    ) -> Result<Finding, ProviderError> {
        let this = self.clone();
        let mut check = tokio::spawn(async move { this.evaluate(job_id, user_id, &input).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut check).await {
                Ok(joined) => joined,
                Err(_) => {
                    check.abort();
                    return Err(ProviderError::Timeout(limit));
                }
            },
            None => check.await,
        };
        joined.unwrap_or_else(|e| Err(ProviderError::Aborted(e.to_string())))
    }

    async fn evaluate(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        input: &CheckInput,
    ) -> Result<Finding, ProviderError> {
        match input {
            CheckInput::Address(location) => {
                self.evaluate_address(job_id, user_id, location).await
            }
            CheckInput::Identity(payload) => {
                let request = IdentityCheckRequest {
                    job_id,
                    user_id,
                    payload: payload.clone(),
                };
                let outcome = self.provider.verify_identity(&request).await?;
                Ok(self.identity_finding(&outcome))
            }
        }
    }

    async fn evaluate_address(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        location: &Location,
    ) -> Result<Finding, ProviderError> {
        let completeness = assess_completeness(location);

        // Nothing to send; no provider call.
        if completeness.tier == CompletenessTier::Insufficient {
            return Ok(Finding {
                risk: RiskLevel::High,
                data: json!({
                    "completeness": completeness.tier,
                    "addressMatch": false,
                    "coordinatesValid": completeness.coordinates_valid,
                    "postalCodeValid": completeness.postal_code_valid,
                    "confidence": 0.0,
                    "provider": Value::Null,
                    "reference": Value::Null,
                    "location": location,
                }),
                notes: "Insufficient address data to verify".to_string(),
                matched_location: None,
            });
        }

        let request = AddressCheckRequest {
            job_id,
            user_id,
            tier: completeness.tier,
            location: location.clone(),
        };
        let outcome = self.provider.verify_address(&request).await?;
        let risk = address_risk(completeness.tier, outcome.matched);

        let notes = match (completeness.tier, outcome.matched) {
            (CompletenessTier::Full, true) => "Address verified with complete data",
            (CompletenessTier::Full, false) => "Address could not be matched despite complete data",
            (_, true) => "Address verified with partial data",
            (_, false) => "Address could not be matched with the partial data provided",
        };

        Ok(Finding {
            risk,
            data: json!({
                "completeness": completeness.tier,
                "addressMatch": outcome.matched,
                "coordinatesValid": completeness.coordinates_valid,
                "postalCodeValid": completeness.postal_code_valid,
                "confidence": outcome.confidence,
                "provider": self.provider.name(),
                "reference": outcome.reference,
                "location": location,
            }),
            notes: format!("{notes} (confidence {:.2})", outcome.confidence),
            matched_location: outcome.matched.then(|| location.clone()),
        })
    }

    fn identity_finding(&self, outcome: &ProviderOutcome) -> Finding {
        let risk = identity_risk(outcome.matched, outcome.confidence);
        let notes = if outcome.matched {
            "Identity verified"
        } else {
            "Identity could not be verified"
        };
        Finding {
            risk,
            data: json!({
                "identityMatch": outcome.matched,
                "confidence": outcome.confidence,
                "provider": self.provider.name(),
                "reference": outcome.reference,
            }),
            notes: format!("{notes} (confidence {:.2})", outcome.confidence),
            matched_location: None,
        }
    }
}
