// HTTP JSON transport layer implementation
// This file implements the shared GET client used by the registry and release
// fetchers to query hosting APIs for download counts
//
// Numan Thabit 2025 Nov

use crate::errors::ExporterError;
use crate::metrics::UPSTREAM_LATENCY;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct JsonHttp {
    http: Client,
}

impl JsonHttp {
    /// Build a client whose requests never outlive `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ExporterError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| ExporterError::Transport(format!("build http client: {e}")))?;
        Ok(Self { http })
    }

    /// GET `url` and decode the JSON body, rejecting non-success statuses first.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        source: &str,
    ) -> Result<T, ExporterError> {
        let _timer = UPSTREAM_LATENCY
            .with_label_values(&[source])
            .start_timer();

        let resp = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ExporterError::Transport(format!("{source} send: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExporterError::Rejected {
                url: url.to_string(),
                status,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ExporterError::Transport(format!("{source} read body: {e}")))?;
        debug!(source = source, url = url, bytes = body.len(), "upstream response");

        serde_json::from_slice(&body)
            .map_err(|e| ExporterError::Decode(format!("{source} response: {e}")))
    }
}
