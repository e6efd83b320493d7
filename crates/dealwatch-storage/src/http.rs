use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

/// 5xx and 429 are worth another attempt; anything else is final.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// How often and how patiently a request is repeated.
///
/// `attempts` counts the first try. A throttled response that names a
/// `Retry-After` delay is honored up to `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub first_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            first_delay: Duration::from_millis(250),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt. Used for publishing calls where a retry could post twice.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (0-based); doubles each time.
    pub fn delay(&self, retry: usize, retry_after: Option<Duration>) -> Duration {
        let doubled = (0..retry).fold(self.first_delay, |delay, _| delay.saturating_mul(2));
        retry_after.unwrap_or(doubled).min(self.ceiling)
    }

    fn allows_retry(&self, retry: usize) -> bool {
        retry + 1 < self.attempts
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub max_in_flight_per_target: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some(format!("dealwatch/{}", env!("CARGO_PKG_VERSION"))),
            max_in_flight: 16,
            max_in_flight_per_target: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpClientConfig {
    pub fn without_retries(mut self) -> Self {
        self.retry = RetryPolicy::once();
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(HttpError::Decode)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into an error carrying the body.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HttpError::HttpStatus {
                status: self.status.as_u16(),
                url: self.final_url.clone(),
                body: self.text(),
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("response decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("http client shut down")]
    Closed,
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::HttpStatus { status, .. } => Some(*status),
            HttpError::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Shared outbound client with in-flight limits per target and bounded retries.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    in_flight: Semaphore,
    per_target_limit: usize,
    targets: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            client: builder.build().context("building reqwest client")?,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            per_target_limit: config.max_in_flight_per_target.max(1),
            targets: Mutex::new(HashMap::new()),
            retry: config.retry,
        })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn target_slots(&self, target: &str) -> Arc<Semaphore> {
        let mut targets = self.targets.lock().await;
        Arc::clone(
            targets
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_target_limit))),
        )
    }

    /// Send the request produced by `build`, repeating transient failures.
    ///
    /// Any final status is returned as a response; callers decide what a
    /// non-2xx status means for them.
    pub async fn execute<F>(&self, target: &str, build: F) -> Result<HttpResponse, HttpError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let _slot = self.in_flight.acquire().await.map_err(|_| HttpError::Closed)?;
        let slots = self.target_slots(target).await;
        let _target_slot = slots.acquire().await.map_err(|_| HttpError::Closed)?;

        self.send_with_retries(&build)
            .instrument(info_span!("http_request", target))
            .await
    }

    async fn send_with_retries<F>(&self, build: &F) -> Result<HttpResponse, HttpError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut retry = 0;
        loop {
            let wait = match build(&self.client).send().await {
                Ok(resp) if is_transient_status(resp.status()) && self.retry.allows_retry(retry) => {
                    debug!(status = %resp.status(), retry, "transient status, retrying");
                    self.retry.delay(retry, retry_after(&resp))
                }
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.bytes().await?.to_vec();
                    return Ok(HttpResponse {
                        status,
                        final_url,
                        body,
                    });
                }
                Err(err) if is_transient_error(&err) && self.retry.allows_retry(retry) => {
                    debug!(error = %err, retry, "request failed, retrying");
                    self.retry.delay(retry, None)
                }
                Err(err) => return Err(HttpError::Request(err)),
            };
            tokio::time::sleep(wait).await;
            retry += 1;
        }
    }
}
