use serde::{Deserialize, Serialize};

use crate::models::location::Location;
use crate::models::verification::RiskLevel;

/// How much of an address claim there is to verify.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessTier {
    /// Valid coordinates, full address and a well-formed postal code.
    Full,
    /// An address line or valid coordinates, but not everything.
    Partial,
    /// Nothing a provider could check.
    Insufficient,
}

/// Facts about a location snapshot that drive tiering and end up in `checkData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completeness {
    pub tier: CompletenessTier,
    pub coordinates_valid: bool,
    pub postal_code_valid: bool,
}

/// Match probabilities for the simulated provider, per tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessRates {
    pub full: f64,
    pub partial: f64,
    pub identity: f64,
}

impl Default for SuccessRates {
    fn default() -> Self {
        Self {
            full: 0.95,
            partial: 0.75,
            identity: 0.90,
        }
    }
}

impl SuccessRates {
    pub fn for_tier(&self, tier: CompletenessTier) -> f64 {
        match tier {
            CompletenessTier::Full => self.full,
            CompletenessTier::Partial => self.partial,
            CompletenessTier::Insufficient => 0.0,
        }
    }
}

/// Identity matches at or above this confidence are scored LOW.
pub const IDENTITY_CONFIDENCE_THRESHOLD: f64 = 0.8;

pub fn assess_completeness(location: &Location) -> Completeness {
    let coordinates_valid = location.coordinates.is_some_and(|c| c.is_valid());
    let postal_code_valid = location
        .postal_code
        .as_deref()
        .is_some_and(is_well_formed_postal_code);
    let has_address = !location.address.trim().is_empty();
    let full_address = has_address
        && !location.city.trim().is_empty()
        && !location.state.trim().is_empty();

    let tier = if coordinates_valid && full_address && postal_code_valid {
        CompletenessTier::Full
    } else if has_address || coordinates_valid {
        CompletenessTier::Partial
    } else {
        CompletenessTier::Insufficient
    };

    Completeness {
        tier,
        coordinates_valid,
        postal_code_valid,
    }
}

/// 6-digit PIN, 5-digit ZIP, or ZIP+4.
pub fn is_well_formed_postal_code(code: &str) -> bool {
    let code = code.trim();
    let digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());
    match code.split_once('-') {
        Some((zip, plus4)) => digits(zip, 5) && digits(plus4, 4),
        None => digits(code, 6) || digits(code, 5),
    }
}

pub fn address_risk(tier: CompletenessTier, matched: bool) -> RiskLevel {
    match (tier, matched) {
        (CompletenessTier::Full, true) => RiskLevel::Low,
        (CompletenessTier::Full, false) => RiskLevel::Medium,
        (CompletenessTier::Partial, true) => RiskLevel::Medium,
        (CompletenessTier::Partial, false) => RiskLevel::High,
        (CompletenessTier::Insufficient, _) => RiskLevel::High,
    }
}

pub fn identity_risk(matched: bool, confidence: f64) -> RiskLevel {
    match matched {
        true if confidence >= IDENTITY_CONFIDENCE_THRESHOLD => RiskLevel::Low,
        true => RiskLevel::Medium,
        false => RiskLevel::High,
    }
}
