pub mod aggregator;
pub mod handlers;

pub use aggregator::{RiskAggregator, RiskAssessment};
