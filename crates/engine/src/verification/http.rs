use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{TaxpayerRecord, VerificationOutcome, VerificationService};

/// Client for the verification gateway fronting the tax registry.
pub struct HttpVerificationService {
    base_url: String,
    client: Client,
    auth_token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TaxpayerRecord>,
}

impl HttpVerificationService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            auth_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL extended with `segments`, each percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Gateway URL {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, segments: &[&str]) -> Result<reqwest::RequestBuilder> {
        let mut request = self.client.get(self.endpoint(segments)?).timeout(self.timeout);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        Ok(request)
    }
}

#[async_trait]
impl VerificationService for HttpVerificationService {
    async fn search(&self, name: &str) -> Result<Vec<TaxpayerRecord>> {
        debug!("Searching taxpayer registry for {}", name);
        let response = self
            .get(&["taxpayers", "search"])?
            .query(&[("name", name)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow::anyhow!("Taxpayer search failed ({}): {}", status, error_text));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.results)
    }

    async fn verify(&self, nif: &str) -> Result<VerificationOutcome> {
        debug!("Verifying taxpayer {}", nif);
        let response = self.get(&["taxpayers", nif, "verify"])?.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(VerificationOutcome {
                verified: false,
                record: None,
                reason: Some("not_found".to_string()),
            });
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow::anyhow!("Taxpayer verification failed ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }
}
