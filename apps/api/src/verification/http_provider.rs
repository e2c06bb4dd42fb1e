//! HTTP verification provider. Posts checks to an external KYC/address-validation
//! service and maps its JSON answer onto `ProviderOutcome`.
//!
//! Wire contract: `POST {base}/address` and `POST {base}/identity` with the
//! request structs as JSON, bearer-authenticated, answering
//! `{"matched": bool, "confidence": f64, "reference": string?}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::verification::provider::{
    AddressCheckRequest, IdentityCheckRequest, ProviderError, ProviderOutcome,
    VerificationProvider,
};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Posts one check and rejects answers whose confidence is not in [0, 1].
    async fn check<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ProviderOutcome, ProviderError> {
        let outcome: ProviderOutcome = self.post(path, body).await?;
        if !(outcome.confidence.is_finite() && (0.0..=1.0).contains(&outcome.confidence)) {
            return Err(ProviderError::InvalidOutcome(format!(
                "confidence {} is outside [0, 1]",
                outcome.confidence
            )));
        }
        Ok(outcome)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// POSTs `body` and decodes the JSON answer.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let url = self.endpoint(path);
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 500ms, 1s
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "Provider call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ProviderError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Provider returned {}: {}", status, body);
                last_error = Some(ProviderError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ProviderErrorBody>(&body)
                    .map(|e| e.message)
                    .unwrap_or(body);
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let decoded: T = response.json().await?;
            debug!("Provider call to {url} succeeded");
            return Ok(decoded);
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::Unavailable(format!("no answer after {MAX_RETRIES} attempts"))
        }))
    }
}

#[async_trait]
impl VerificationProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn verify_address(
        &self,
        request: &AddressCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError> {
        self.check("address", request).await
    }

    async fn verify_identity(
        &self,
        request: &IdentityCheckRequest,
    ) -> Result<ProviderOutcome, ProviderError> {
        self.check("identity", request).await
    }
}
