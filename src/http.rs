//! Blocking HTTP client used for dependency downloads and proxy health checks.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

/// Thin wrapper over a shared `ureq` agent. Every request carries its own deadline.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// Stream the body of `url` into `dest`. Non-2xx responses are errors.
    pub fn download(&self, url: &str, dest: &mut dyn Write, timeout: Duration) -> Result<u64> {
        debug!(url, timeout_secs = timeout.as_secs(), "http:download start");
        let response = self
            .agent
            .get(url)
            .timeout(timeout)
            .call()
            .with_context(|| format!("Failed to download {}", url))?;

        let mut reader = response.into_reader();
        let written = std::io::copy(&mut reader, dest)
            .with_context(|| format!("Failed to read response body from {}", url))?;
        debug!(url, bytes = written, "http:download done");
        Ok(written)
    }

    /// Fetch at most `limit` bytes of the body of `url`, whatever the status code.
    pub fn fetch_prefix(&self, url: &str, limit: u64, timeout: Duration) -> Result<String> {
        let response = match self.agent.get(url).timeout(timeout).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                trace!(url, code, "http:non-success status");
                response
            }
            Err(e) => return Err(e).with_context(|| format!("Request to {} failed", url)),
        };

        let mut body = String::new();
        response
            .into_reader()
            .take(limit)
            .read_to_string(&mut body)
            .with_context(|| format!("Failed to read response body from {}", url))?;
        Ok(body)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
