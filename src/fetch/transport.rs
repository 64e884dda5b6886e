//! HTTP transport used by the fetch layer.
//!
//! The cache manager only needs "GET this URL and give me a byte stream", so
//! the network sits behind the [`Transport`] trait. [`UreqTransport`] is the
//! production implementation; tests substitute a recording fake.

use std::io::Read;
use std::time::Duration;

use crate::error::DatasetError;

/// Default connect timeout for remote requests.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// A successful response whose body has not been consumed yet.
pub struct FetchResponse {
    /// Value of the `content-length` header, when the server sent one.
    pub content_length: Option<u64>,
    /// Streaming response body.
    pub body: Box<dyn Read>,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Issues a single blocking GET per call.
///
/// Implementations must return [`DatasetError::NetworkUnavailable`] for an
/// unreachable host or a non-success status. No retries happen here.
pub trait Transport {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError>;
}

/// `ureq`-backed transport.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    /// Create a transport with the default connect timeout.
    pub fn new() -> Self {
        Self::with_connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom connect timeout.
    ///
    /// Only connection setup is bounded; large archives may take a long time
    /// to stream and are not cut off.
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(timeout))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError> {
        let response =
            self.agent
                .get(url)
                .call()
                .map_err(|source| DatasetError::NetworkUnavailable {
                    url: url.to_string(),
                    reason: source.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::NetworkUnavailable {
                url: url.to_string(),
                reason: format!("GET request failed with status {}", status),
            });
        }

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        Ok(FetchResponse {
            content_length,
            body: Box::new(response.into_body().into_reader()),
        })
    }
}
