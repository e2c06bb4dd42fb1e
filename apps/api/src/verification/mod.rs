pub mod handlers;
pub mod http_provider;
pub mod orchestrator;
pub mod policy;
pub mod provider;

pub use http_provider::HttpProvider;
pub use orchestrator::CheckOrchestrator;
pub use provider::{FixedProvider, SimulatedProvider, VerificationProvider};
