//! Bounded HTTP health probing against service host ports.

use std::time::Duration;

use tracing::debug;

use crate::spec::HealthCheck;

/// Result of one probe attempt. `Unreachable` covers connection refusal and
/// timeouts alike; during startup both simply mean "not yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy(u16),
    Unhealthy(u16),
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy(_))
    }
}

/// HTTP prober with a per-request deadline. One client is shared across all
/// probes in an invocation.
pub struct HealthProbe {
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// GET the declared path on host loopback and grade the status code
    /// against the check's accepted range. Never follows the body.
    pub async fn check(&self, host_port: u16, check: &HealthCheck) -> ProbeOutcome {
        let url = format!("http://127.0.0.1:{host_port}{}", check.path);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if check.accepts(status) {
                    ProbeOutcome::Healthy(status)
                } else {
                    ProbeOutcome::Unhealthy(status)
                }
            }
            Err(err) => {
                debug!(url, error = %err, "health probe unreachable");
                ProbeOutcome::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn check(path: &str, low: u16, high: u16) -> HealthCheck {
        HealthCheck {
            path: path.to_string(),
            accept_low: low,
            accept_high: high,
        }
    }

    #[tokio::test]
    async fn accepted_status_is_healthy() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200);
        });
        let probe = HealthProbe::new(Duration::from_secs(2));
        let outcome = probe
            .check(server.port(), &check("/api/tags", 200, 299))
            .await;
        assert_eq!(outcome, ProbeOutcome::Healthy(200));
    }

    #[tokio::test]
    async fn redirect_status_within_range_is_healthy() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(302).header("Location", "/auth");
        });
        let probe = HealthProbe::new(Duration::from_secs(2));
        let outcome = probe.check(server.port(), &check("/", 200, 399)).await;
        assert_eq!(outcome, ProbeOutcome::Healthy(302));
    }

    #[tokio::test]
    async fn status_outside_range_is_unhealthy() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(500);
        });
        let probe = HealthProbe::new(Duration::from_secs(2));
        let outcome = probe.check(server.port(), &check("/", 200, 299)).await;
        assert_eq!(outcome, ProbeOutcome::Unhealthy(500));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let probe = HealthProbe::new(Duration::from_millis(500));
        // Port 9 (discard) is essentially never listening locally.
        let outcome = probe.check(9, &check("/", 200, 299)).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }
}
