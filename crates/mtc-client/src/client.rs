//! MTConnect agent HTTP client

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::document::{AssetsDocument, DevicesDocument, StreamsDocument};
use crate::error::{AgentClientError, Result};

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for a single MTConnect agent.
///
/// When a device name is set, requests are scoped to that device
/// (`/{device}/current`); otherwise they go to the agent root and cover
/// every device the agent serves.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    base_url: Url,
    device_name: Option<String>,
}

impl AgentClient {
    /// Create a new agent client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the agent (e.g., "http://10.0.0.5:5000")
    /// * `device_name` - Device to scope requests to
    pub fn new(base_url: &str, device_name: Option<&str>) -> Result<Self> {
        Self::with_timeout(base_url, device_name, DEFAULT_TIMEOUT)
    }

    /// Create a new agent client with a custom request timeout.
    ///
    /// The connect timeout is capped by the request timeout.
    pub fn with_timeout(
        base_url: &str,
        device_name: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(DEFAULT_CONNECT_TIMEOUT))
            .build()?;

        let base_url = Url::parse(base_url)?;

        Ok(Self {
            client,
            base_url,
            device_name: device_name.map(str::to_string),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Fetch the structural description of the device(s)
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn probe(&self) -> Result<DevicesDocument> {
        let body = self.fetch("probe", &[]).await?;
        DevicesDocument::parse(&body)
    }

    /// Fetch the latest value of every data item
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn current(&self) -> Result<StreamsDocument> {
        let body = self.fetch("current", &[]).await?;
        StreamsDocument::parse(&body)
    }

    /// Fetch up to `count` observations starting at sequence `from`
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn sample(&self, from: u64, count: u32) -> Result<StreamsDocument> {
        let from = from.to_string();
        let count = count.to_string();
        let body = self
            .fetch("sample", &[("from", from.as_str()), ("count", count.as_str())])
            .await?;
        StreamsDocument::parse(&body)
    }

    /// Fetch the assets published by the agent
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn assets(&self) -> Result<AssetsDocument> {
        let body = self.fetch("assets", &[]).await?;
        AssetsDocument::parse(&body)
    }

    /// Build the URL for a request verb
    pub fn request_url(&self, verb: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                AgentClientError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?;
            segments.pop_if_empty();
            if let Some(name) = &self.device_name {
                segments.push(name);
            }
            segments.push(verb);
        }
        Ok(url)
    }

    async fn fetch(&self, verb: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = self.request_url(verb)?;
        debug!("GET {}", url);

        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // Agents answer errors with an MTConnectError document, sometimes
        // with a 4xx status. Let the document parser report those.
        if status.is_success() || body.contains("MTConnectError") {
            Ok(body)
        } else {
            Err(AgentClientError::server_error(
                status.as_u16(),
                status.canonical_reason().unwrap_or("request failed"),
            ))
        }
    }
}
