use std::sync::Arc;

use crate::config::Config;
use crate::geo::GeoIndex;
use crate::risk::RiskAggregator;
use crate::store::{JobStore, LocationStore};
use crate::verification::{CheckOrchestrator, VerificationProvider};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub geo: GeoIndex,
    pub orchestrator: CheckOrchestrator,
    pub risk: RiskAggregator,
    /// "postgres" or "memory", reported by /health.
    pub storage: &'static str,
}

impl AppState {
    /// Wires the core components over the chosen stores and provider.
    pub fn new(
        config: Config,
        locations: Arc<dyn LocationStore>,
        jobs: Arc<dyn JobStore>,
        provider: Arc<dyn VerificationProvider>,
        storage: &'static str,
    ) -> Self {
        let geo = GeoIndex::new(locations);
        let orchestrator = CheckOrchestrator::new(jobs.clone(), geo.clone(), provider)
            .with_timeout(config.verification_timeout);
        let risk = RiskAggregator::new(jobs);
        Self {
            config,
            geo,
            orchestrator,
            risk,
            storage,
        }
    }
}
