//! Worker agent liveness probe
//!
//! Polls the offers endpoint of the worker agent on a newly-booted machine.
//! The probe performs a single bounded attempt; retry and backoff belong to
//! the launcher driving it. A TCP connection refused is surfaced with a
//! recognizable message suffix so the launcher can classify it as the agent
//! container not having bound its port yet.

use armada_core::{Offer, ProvisionError, Result, WorkerProbe};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Port the worker agent listens on
pub const WORKER_PORT: u16 = 9000;

/// Default per-attempt timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTPS client for the worker agent's offers endpoint.
pub struct HttpWorkerProbe {
    client: reqwest::Client,
    port: u16,
}

impl HttpWorkerProbe {
    /// Build with a fresh client using the default per-attempt timeout
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PROBE_TIMEOUT)
            .build()
            .expect("default HTTP client construction cannot fail");
        Self::with_client(client)
    }

    /// Build over a shared, preconfigured client (TLS roots, timeouts)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            port: WORKER_PORT,
        }
    }

    /// Override the worker agent port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn offers_url(&self, dns: &str) -> String {
        format!("https://{dns}:{}/v1/offers", self.port)
    }
}

impl Default for HttpWorkerProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerProbe for HttpWorkerProbe {
    async fn offers(&self, dns: &str) -> Result<Vec<Offer>> {
        let url = self.offers_url(dns);
        debug!(url, "requesting worker offers");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(&url, e))?;

        if !response.status().is_success() {
            return Err(ProvisionError::Http(format!(
                "{url}: status {}",
                response.status()
            )));
        }

        let offers = response
            .json::<Vec<Offer>>()
            .await
            .map_err(|e| map_transport_error(&url, e))?;
        Ok(offers)
    }
}

fn map_transport_error(url: &str, err: reqwest::Error) -> ProvisionError {
    if err.is_timeout() {
        return ProvisionError::timeout(format!("{url}: {err}"));
    }
    if is_connection_refused(&err) {
        return ProvisionError::Http(format!("{url}: connection refused"));
    }
    ProvisionError::Http(format!("{url}: {err}"))
}

// Walk the source chain looking for the refused TCP connect.
fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offers_url() {
        let probe = HttpWorkerProbe::new();
        assert_eq!(
            probe.offers_url("ec2-54-1-2-3.us-west-2.compute.amazonaws.com"),
            "https://ec2-54-1-2-3.us-west-2.compute.amazonaws.com:9000/v1/offers"
        );
        let probe = probe.with_port(9443);
        assert!(probe.offers_url("host").ends_with(":9443/v1/offers"));
    }

    #[tokio::test]
    async fn test_refused_connection_has_recognizable_suffix() {
        // Bind to learn a free port, then drop the listener so nothing is
        // listening when the probe connects.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpWorkerProbe::new().with_port(port);
        let err = probe.offers("127.0.0.1").await.unwrap_err();
        match err {
            ProvisionError::Http(msg) => {
                assert!(msg.ends_with("connection refused"), "got: {msg}")
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
