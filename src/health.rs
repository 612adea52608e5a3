use std::time::Duration;

use anyhow::{Context, Result};
use hyper::client::HttpConnector;
use hyper::header::USER_AGENT;
use hyper::{Body, Client, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::jitter::sleep_with_jitter;
use crate::metadata;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HealthProbe {
    endpoint: Uri,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HealthProbe {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint
            .parse::<Uri>()
            .with_context(|| format!("invalid registry health endpoint `{}`", endpoint))?;

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        Ok(HealthProbe {
            endpoint,
            client: Client::builder().build(connector),
        })
    }

    async fn status(&self) -> Result<StatusCode> {
        let request = Request::get(self.endpoint.clone())
            .header(USER_AGENT, metadata::USER_AGENT)
            .body(Body::empty())
            .context("could not build health request")?;

        let response = timeout(PROBE_TIMEOUT, self.client.request(request))
            .await
            .context("health request timed out")?
            .context("health request failed")?;

        Ok(response.status())
    }

    /// Polls the endpoint until it answers `200 OK`.
    ///
    /// Returns `false` when cancelled before the registry became ready.
    pub async fn wait(&self, interval: u64, token: &CancellationToken) -> bool {
        loop {
            log::info!(
                "Waiting for registry health endpoint at {} to be ready",
                self.endpoint
            );

            match self.status().await {
                Ok(StatusCode::OK) => {
                    log::info!("Registry is ready");
                    return true;
                }
                Ok(status) => log::debug!("registry health endpoint returned {}", status),
                Err(error) => log::debug!("registry health probe failed: {:#}", error),
            }

            if !sleep_with_jitter(interval, token).await {
                return false;
            }
        }
    }
}
