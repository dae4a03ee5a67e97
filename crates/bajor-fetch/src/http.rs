//! Blocking HTTP fetcher for remote subject images.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bajor_core::{Event, Observer};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("GET {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("GET {url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } => Some(url),
            Self::Client(_) => None,
        }
    }
}

/// A failure below the HTTP layer: the request never produced a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection and read failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Read(_))
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    pub status: u16,
    /// Declared `Content-Type` header, verbatim.
    pub content_type: Option<String>,
    /// Streamed body. Nothing is buffered until the caller reads.
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// One GET request, no retries. The seam between [`Fetcher`] and the network.
pub trait HttpGet: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Fetcher settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub retry: RetryPolicy,
    pub connect_timeout_secs: u64,
    /// Applies to each read on the socket, not the whole download.
    pub read_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
        }
    }
}

/// [`HttpGet`] over a pooled `reqwest` blocking client.
///
/// The client (and its connection pool) is created once per run and shared by
/// every worker; it holds no per-request retry state.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpGet for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let resp = self.client.get(url).send().map_err(classify)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(HttpResponse {
            status,
            content_type,
            body: Box::new(resp),
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_timeout() || err.is_body() {
        TransportError::Read(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// GET with bounded retry on transient failures and fail-fast on error statuses.
///
/// Every failure is reported to the observer with the offending URL before it
/// is returned.
pub struct Fetcher {
    transport: Arc<dyn HttpGet>,
    policy: RetryPolicy,
    observer: Arc<dyn Observer>,
}

impl Fetcher {
    /// Fetcher over the network with a fresh connection pool.
    pub fn new(config: &FetchConfig, observer: Arc<dyn Observer>) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.retry.clone(),
            observer,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn HttpGet>,
        policy: RetryPolicy,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            transport,
            policy,
            observer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, returning the response with its body still unread.
    pub fn fetch(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut failures = 0u32;
        loop {
            match self.transport.get(url) {
                Ok(resp) if resp.status >= 400 => {
                    // Rejections are final: no retry budget spent on them.
                    return Err(self.fail(FetchError::Status {
                        url: url.to_string(),
                        status: resp.status,
                    }));
                }
                Ok(resp) => {
                    if failures > 0 {
                        tracing::debug!(url, failures, "fetched after retry");
                    }
                    return Ok(resp);
                }
                Err(e) if e.is_retryable() && failures < self.policy.max_retries => {
                    failures += 1;
                    let delay = self.policy.delay_after(failures);
                    self.observer.event(&Event::FetchRetry {
                        url: url.to_string(),
                        attempt: failures,
                        delay,
                        error: e.to_string(),
                    });
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => {
                    return Err(self.fail(FetchError::Transport {
                        url: url.to_string(),
                        attempts: failures + 1,
                        source: e,
                    }));
                }
            }
        }
    }

    fn fail(&self, err: FetchError) -> FetchError {
        self.observer.event(&Event::FetchFailed {
            url: err.url().unwrap_or_default().to_string(),
            error: err.to_string(),
        });
        err
    }
}
