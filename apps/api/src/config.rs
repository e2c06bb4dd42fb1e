use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Which verification backend the orchestrator talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Simulated,
    Fixed,
    Http,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(ProviderKind::Simulated),
            "fixed" => Ok(ProviderKind::Fixed),
            "http" => Ok(ProviderKind::Http),
            other => bail!("unknown verification provider '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if a variable is present but malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory stores.
    pub database_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub provider: ProviderKind,
    pub provider_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub address_check_delay: Duration,
    pub identity_check_delay: Duration,
    pub verification_timeout: Option<Duration>,
    pub auto_verify_on_location_write: bool,
    pub max_radius_km: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: None,
            port: 8080,
            rust_log: "info".to_string(),
            provider: ProviderKind::Simulated,
            provider_url: None,
            provider_api_key: None,
            address_check_delay: Duration::from_secs(5),
            identity_check_delay: Duration::from_secs(8),
            verification_timeout: Some(Duration::from_secs(60)),
            auto_verify_on_location_write: true,
            max_radius_km: 500.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = Config::default();
        let timeout_secs: u64 = env_or("VERIFICATION_TIMEOUT_SECS", 60)?;

        let config = Config {
            database_url: optional_env("DATABASE_URL"),
            port: env_or("PORT", defaults.port)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or(defaults.rust_log),
            provider: env_or("VERIFICATION_PROVIDER", defaults.provider)?,
            provider_url: optional_env("PROVIDER_URL"),
            provider_api_key: optional_env("PROVIDER_API_KEY"),
            address_check_delay: Duration::from_secs(env_or("ADDRESS_CHECK_DELAY_SECS", 5)?),
            identity_check_delay: Duration::from_secs(env_or("IDENTITY_CHECK_DELAY_SECS", 8)?),
            verification_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            auto_verify_on_location_write: env_or(
                "AUTO_VERIFY_ON_LOCATION_WRITE",
                defaults.auto_verify_on_location_write,
            )?,
            max_radius_km: env_or("MAX_RADIUS_KM", defaults.max_radius_km)?,
        };

        if config.provider == ProviderKind::Http && config.provider_url.is_none() {
            bail!("PROVIDER_URL must be set when VERIFICATION_PROVIDER=http");
        }
        if !(config.max_radius_km.is_finite() && config.max_radius_km > 0.0) {
            bail!("MAX_RADIUS_KM must be a positive number");
        }

        Ok(config)
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("HTTP".parse::<ProviderKind>().unwrap(), ProviderKind::Http);
        assert_eq!(
            " simulated ".parse::<ProviderKind>().unwrap(),
            ProviderKind::Simulated
        );
        assert!("carrier-pigeon".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_defaults_match_reference_latencies() {
        let config = Config::default();
        assert_eq!(config.address_check_delay, Duration::from_secs(5));
        assert_eq!(config.identity_check_delay, Duration::from_secs(8));
        assert!(config.auto_verify_on_location_write);
    }
}
