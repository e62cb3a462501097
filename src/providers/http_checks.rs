//! HTTP probe implementations of the per-provider checks
//!
//! Both checks race the request against the execution's cancellation token
//! and bail out as soon as it fires.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Provider, ProviderRoster, RetrievalCheck, UploadCheck};
use crate::config::ProbeConfig;

fn build_client(config: &ProbeConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")
}

fn endpoint(service_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        service_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Uploads a random payload to the provider's upload endpoint
pub struct HttpUploadCheck {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HttpUploadCheck {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; self.config.upload_payload_bytes];
        rand::rng().fill(&mut payload[..]);
        payload
    }
}

#[async_trait]
impl UploadCheck for HttpUploadCheck {
    async fn run(&self, provider: &Provider, token: CancellationToken) -> Result<()> {
        let url = endpoint(&provider.service_url, &self.config.upload_path);
        let payload = self.payload();
        let size = payload.len();

        let request = self.client.post(&url).body(payload).send();

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                bail!("Upload check for {} cancelled", provider.address);
            }
            response = request => {
                let response = response
                    .with_context(|| format!("Upload to {url} failed"))?
                    .error_for_status()
                    .with_context(|| format!("Upload to {url} rejected"))?;
                debug!(
                    "Upload check for {} accepted {} bytes with status {}",
                    provider.address,
                    size,
                    response.status()
                );
                Ok(())
            }
        }
    }
}

/// Fetches the provider's retrieval endpoint and drains the body
pub struct HttpRetrievalCheck {
    client: reqwest::Client,
    roster: Arc<dyn ProviderRoster>,
    config: ProbeConfig,
}

impl HttpRetrievalCheck {
    pub fn new(config: &ProbeConfig, roster: Arc<dyn ProviderRoster>) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            roster,
            config: config.clone(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<usize> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Retrieval from {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Retrieval from {url} rejected"))?;
        let body = response.bytes().await?;
        Ok(body.len())
    }
}

#[async_trait]
impl RetrievalCheck for HttpRetrievalCheck {
    async fn run(&self, provider_address: &str, token: CancellationToken) -> Result<()> {
        let provider = self
            .roster
            .get_provider(provider_address)
            .await?
            .with_context(|| format!("Provider {provider_address} not found"))?;
        let url = endpoint(&provider.service_url, &self.config.retrieval_path);

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                bail!("Retrieval check for {} cancelled", provider_address);
            }
            fetched = self.fetch(&url) => {
                let bytes = fetched?;
                debug!("Retrieval check for {} read {} bytes", provider_address, bytes);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_duplicate_slashes() {
        assert_eq!(endpoint("http://sp.example/", "/upload"), "http://sp.example/upload");
        assert_eq!(endpoint("http://sp.example", "retrieve"), "http://sp.example/retrieve");
    }

    #[test]
    fn upload_payload_has_configured_size() {
        let config = ProbeConfig {
            upload_payload_bytes: 128,
            ..ProbeConfig::default()
        };
        let check = HttpUploadCheck::new(&config).unwrap();
        assert_eq!(check.payload().len(), 128);
    }

    #[tokio::test]
    async fn cancelled_upload_fails_fast() {
        let check = HttpUploadCheck::new(&ProbeConfig::default()).unwrap();
        let provider = Provider {
            address: "f01".to_string(),
            // Non-routable address keeps the request pending until cancellation wins
            service_url: "http://10.255.255.1:9".to_string(),
            active: true,
            approved: true,
        };
        let token = CancellationToken::new();
        token.cancel();

        let err = check.run(&provider, token).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
