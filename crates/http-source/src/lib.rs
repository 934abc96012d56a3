//! HTTP(S) source for bucketferry transfers.
//!
//! Issues one GET per fetch and hands the response body to the pipeline as a
//! stream, so nothing is buffered here beyond what `reqwest` reads.

use std::time::Duration;

use bucketferry_transfer::{FetchError, FetchFuture, Source, SourceBody};
use futures_util::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_USER_AGENT: &str = concat!("bucketferry/", env!("CARGO_PKG_VERSION"));

/// Errors from building an [`HttpSource`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Whole-request limit, body included. `None` means no limit.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

/// [`Source`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: &HttpSourceConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
        })
    }
}

fn parse_locator(locator: &str) -> Result<Url, FetchError> {
    let url = Url::parse(locator)
        .map_err(|e| FetchError::InvalidLocator(format!("{locator}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidLocator(format!(
            "{locator}: unsupported scheme {other}"
        ))),
    }
}

impl Source for HttpSource {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = parse_locator(locator)?;
            let resp = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    locator: locator.to_string(),
                    status: status.as_u16(),
                });
            }

            let content_length = resp.content_length();
            debug!(locator, status = status.as_u16(), content_length = ?content_length, "fetch started");

            let stream = resp
                .bytes_stream()
                .map(|piece| piece.map_err(|e| FetchError::Transport(e.to_string())));
            Ok(SourceBody {
                content_length,
                stream: Box::pin(stream),
            })
        })
    }
}
