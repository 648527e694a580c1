//! Synchronous HTTP transport behind a trait seam.
//!
//! The engine never talks to the network directly: it calls [`Transport`],
//! which production code implements with a blocking reqwest client and
//! tests implement with canned page bodies. [`PageFetcher`] wraps a
//! transport with the per-page retry/backoff policy so a transient failure
//! does not silently truncate a crawl on the first attempt.

use std::{thread, time::Duration};

use log::warn;
use serde_json::Value;
use thiserror::Error;

use crate::source::FetchPolicy;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to '{url}' failed: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Header name/value pairs sent with every request of a run.
pub type Headers = [(String, String)];

pub trait Transport {
    fn get(&self, url: &str, headers: &Headers) -> Result<String, TransportError>;
    fn post_json(&self, url: &str, body: &Value, headers: &Headers)
    -> Result<String, TransportError>;
}

/// Blocking reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(policy: &FetchPolicy) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(policy.timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        url: &str,
        headers: &Headers,
    ) -> Result<String, TransportError> {
        let mut request = request;
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().map_err(|err| TransportError::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().map_err(|err| TransportError::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: &Headers) -> Result<String, TransportError> {
        self.send(self.client.get(url), url, headers)
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &Headers,
    ) -> Result<String, TransportError> {
        self.send(self.client.post(url).json(body), url, headers)
    }
}

/// One-page fetch boundary with fixed-delay retries.
pub struct PageFetcher<'a> {
    transport: &'a dyn Transport,
    attempts: u32,
    delay: Duration,
}

impl<'a> PageFetcher<'a> {
    pub fn new(transport: &'a dyn Transport, policy: &FetchPolicy) -> Self {
        Self {
            transport,
            attempts: policy.attempts.max(1),
            delay: Duration::from_millis(policy.retry_delay_ms),
        }
    }

    pub fn get(&self, url: &str, headers: &Headers) -> Result<String, TransportError> {
        self.with_retries(url, || self.transport.get(url, headers))
    }

    pub fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &Headers,
    ) -> Result<String, TransportError> {
        self.with_retries(url, || self.transport.post_json(url, body, headers))
    }

    fn with_retries<F>(&self, url: &str, mut attempt: F) -> Result<String, TransportError>
    where
        F: FnMut() -> Result<String, TransportError>,
    {
        let mut tried = 0u32;
        loop {
            tried += 1;
            match attempt() {
                Ok(body) => return Ok(body),
                Err(err) if tried < self.attempts => {
                    warn!("Fetch attempt {tried}/{} for '{url}' failed: {err}", self.attempts);
                    thread::sleep(self.delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
