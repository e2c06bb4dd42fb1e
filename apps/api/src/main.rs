mod config;
mod db;
mod errors;
mod geo;
mod models;
mod risk;
mod routes;
mod state;
mod store;
mod verification;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, ProviderKind};
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{
    JobStore, LocationStore, MemoryJobStore, MemoryLocationStore, PgJobStore, PgLocationStore,
};
use crate::verification::{FixedProvider, HttpProvider, SimulatedProvider, VerificationProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Trustcheck API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize stores: PostgreSQL when configured, in-memory otherwise
    let (locations, jobs, storage): (Arc<dyn LocationStore>, Arc<dyn JobStore>, &'static str) =
        match &config.database_url {
            Some(url) => {
                let pool = create_pool(url).await?;
                (
                    Arc::new(PgLocationStore::new(pool.clone())) as Arc<dyn LocationStore>,
                    Arc::new(PgJobStore::new(pool)) as Arc<dyn JobStore>,
                    "postgres",
                )
            }
            None => {
                info!("DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(MemoryLocationStore::new()) as Arc<dyn LocationStore>,
                    Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>,
                    "memory",
                )
            }
        };

    // Initialize verification provider
    let provider = build_provider(&config)?;
    info!("Verification provider: {}", provider.name());

    let state = AppState::new(config.clone(), locations, jobs, provider, storage);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_provider(config: &Config) -> Result<Arc<dyn VerificationProvider>> {
    let provider: Arc<dyn VerificationProvider> = match config.provider {
        ProviderKind::Simulated => Arc::new(SimulatedProvider::new(
            config.address_check_delay,
            config.identity_check_delay,
        )),
        ProviderKind::Fixed => Arc::new(FixedProvider::matching()),
        ProviderKind::Http => {
            let url = config
                .provider_url
                .as_deref()
                .context("PROVIDER_URL must be set when VERIFICATION_PROVIDER=http")?;
            Arc::new(HttpProvider::new(url, config.provider_api_key.clone())?)
        }
    };
    Ok(provider)
}
