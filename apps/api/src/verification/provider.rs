//! Verification providers: the pluggable capability that decides whether an
//! address or identity claim checks out.
//!
//! `SimulatedProvider` stands in for a real KYC/address-validation service in demos,
//! `FixedProvider` is the deterministic double used by tests and local runs, and
//! `HttpProvider` (see `http_provider`) talks to a real service.
//!
//! The orchestrator holds an `Arc<dyn VerificationProvider>` and never knows which.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::location::Location;
use crate::verification::policy::{CompletenessTier, SuccessRates};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider answered with an invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("verification task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressCheckRequest {
    pub job_id: Uuid,
    pub user_id: Uuid,
    pub tier: CompletenessTier,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCheckRequest {
    pub job_id: Uuid,
    pub user_id: Uuid,
    /// Opaque; forwarded to the provider as received.
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOutcome {
    pub matched: bool,
    /// 0.0 – 1.0
    pub confidence: f64,
    /// Provider-side case or transaction id, when there is one.
    #[serde(default)]
    pub reference: Option<String>,
}

impl ProviderOutcome {
    pub fn matched(confidence: f64) -> Self {
        Self {
            matched: true,
            confidence,
            reference: None,
        }
    }

    #[allow(dead_code)]
    pub fn rejected(confidence: f64) -> Self {
        Self {
            matched: false,
            confidence,
            reference: None,
        }
    }
}

#[async_trait]
pub trait VerificationProvider: Send + Sync {
    /// Short backend name recorded in `checkData.provider`.
    fn name(&self) -> &'static str;

    async fn verify_address(
        &self,
        request: &AddressCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError>;

    async fn verify_identity(
        &self,
        request: &IdentityCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// SimulatedProvider
// ────────────────────────────────────────────────────────────────────────────

/// Sleeps for a fixed latency, then matches with the tier's success rate.
pub struct SimulatedProvider {
    address_latency: Duration,
    identity_latency: Duration,
    rates: SuccessRates,
}

impl SimulatedProvider {
    pub fn new(address_latency: Duration, identity_latency: Duration) -> Self {
        Self {
            address_latency,
            identity_latency,
            rates: SuccessRates::default(),
        }
    }

    #[allow(dead_code)]
    pub fn with_rates(mut self, rates: SuccessRates) -> Self {
        self.rates = rates;
        self
    }

    fn roll(&self, success_rate: f64) -> ProviderOutcome {
        let mut rng = rand::thread_rng();
        let matched = rng.gen_bool(success_rate.clamp(0.0, 1.0));
        let confidence: f64 = if matched {
            rng.gen_range(0.75..=0.99)
        } else {
            rng.gen_range(0.20..0.60)
        };
        ProviderOutcome {
            matched,
            confidence: (confidence * 100.0).round() / 100.0,
            reference: Some(format!("sim-{}", Uuid::new_v4().simple())),
        }
    }
}

#[async_trait]
impl VerificationProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn verify_address(
        &self,
        request: &AddressCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError> {
        tokio::time::sleep(self.address_latency).await;
        Ok(self.roll(self.rates.for_tier(request.tier)))
    }

    async fn verify_identity(
        &self,
        _request: &IdentityCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError> {
        tokio::time::sleep(self.identity_latency).await;
        Ok(self.roll(self.rates.identity))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FixedProvider
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic provider: every call returns the preset answer.
pub struct FixedProvider {
    address: Result<ProviderOutcome, String>,
    identity: Result<ProviderOutcome, String>,
    delay: Duration,
    calls: AtomicUsize,
}

// Only `matching` is reachable from config; the rest serve tests.
#[allow(dead_code)]
impl FixedProvider {
    pub fn new(
        address: Result<ProviderOutcome, String>,
        identity: Result<ProviderOutcome, String>,
    ) -> Self {
        Self {
            address,
            identity,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Matches everything with high confidence.
    pub fn matching() -> Self {
        Self::new(
            Ok(ProviderOutcome::matched(0.95)),
            Ok(ProviderOutcome::matched(0.95)),
        )
    }

    pub fn rejecting() -> Self {
        Self::new(
            Ok(ProviderOutcome::rejected(0.3)),
            Ok(ProviderOutcome::rejected(0.3)),
        )
    }

    pub fn failing(message: &str) -> Self {
        Self::new(Err(message.to_string()), Err(message.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(
        &self,
        preset: &Result<ProviderOutcome, String>,
    ) -> Result<ProviderOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        preset
            .clone()
            .map_err(ProviderError::Unavailable)
    }
}

#[async_trait]
impl VerificationProvider for FixedProvider {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn verify_address(
        &self,
        _request: &AddressCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError> {
        self.answer(&self.address).await
    }

    async fn verify_identity(
        &self,
        _request: &IdentityCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError> {
        self.answer(&self.identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::location::NewLocation;

    fn address_request(tier: CompletenessTier) -> AddressCheckRequest {
        let user_id = Uuid::new_v4();
        AddressCheckRequest {
            job_id: Uuid::new_v4(),
            user_id,
            tier,
            location: Location::new(
                user_id,
                NewLocation {
                    address: "1 MG Road".into(),
                    city: "Pune".into(),
                    state: "Maharashtra".into(),
                    ..Default::default()
                },
            ),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_provider_waits_for_latency() {
        let provider = SimulatedProvider::new(Duration::from_secs(5), Duration::from_secs(8));
        let started = tokio::time::Instant::now();
        provider
            .verify_address(&address_request(CompletenessTier::Full))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_provider_honours_certain_rates() {
        let always = SimulatedProvider::new(Duration::ZERO, Duration::ZERO).with_rates(
            SuccessRates {
                full: 1.0,
                partial: 0.0,
                identity: 1.0,
            },
        );
        for _ in 0..20 {
            let full = always
                .verify_address(&address_request(CompletenessTier::Full))
                .await
                .unwrap();
            assert!(full.matched);
            assert!((0.75..=0.99).contains(&full.confidence));

            let partial = always
                .verify_address(&address_request(CompletenessTier::Partial))
                .await
                .unwrap();
            assert!(!partial.matched);
            assert!(partial.reference.as_deref().unwrap().starts_with("sim-"));
        }
    }

    #[tokio::test]
    async fn test_fixed_provider_counts_calls_and_fails_on_demand() {
        let provider = FixedProvider::failing("sandbox down");
        let err = provider
            .verify_address(&address_request(CompletenessTier::Full))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(ref m) if m == "sandbox down"));
        assert_eq!(provider.calls(), 1);
    }
}
