//! HTTP transport to the upstream catalog API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use catalogscope_core::{Transport, TransportError, UpstreamResponse};
use reqwest::Client;
use tracing::{debug, warn};

/// Response header carrying the upstream's request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// [`Transport`] over reqwest with optional bearer authentication.
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ReqwestTransport {
    /// Creates a transport rooted at `base_url` (e.g., `http://localhost:8585/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Reads the bearer token from the named environment variable.
    pub fn token_from_env(var: &str) -> Option<String> {
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
            _ => {
                warn!(var, "upstream: no bearer token set, calling upstream unauthenticated");
                None
            }
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TransportError> {
        let url = format!("{}{path}", self.base_url);

        let mut req = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify)?;
        debug!(path, status, bytes = body.len(), "upstream: response");

        let mut upstream = UpstreamResponse::new(status, body.to_vec());
        upstream.request_id = request_id;
        Ok(upstream)
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}
