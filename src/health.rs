use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Liveness probe timeout
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a single health probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx from the health endpoint
    Healthy,
    /// Reachable but answered with a non-2xx status
    Unhealthy(u16),
    /// Nothing accepted the connection
    Refused,
    TimedOut,
    /// Any other transport failure (DNS, TLS, malformed response)
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Seam between the service manager and the health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;

    /// Version string reported by the service, if it exposes one.
    async fn version(&self, _url: &str) -> Option<String> {
        None
    }
}

/// HTTP probe with a bounded timeout
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                debug!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let outcome = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Healthy,
            Ok(response) => ProbeOutcome::Unhealthy(response.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeOutcome::TimedOut,
            Err(e) if e.is_connect() => ProbeOutcome::Refused,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        };
        debug!(url = %url, outcome = ?outcome, "Health probe");
        outcome
    }

    async fn version(&self, url: &str) -> Option<String> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body = response.text().await.ok()?;
        let version = body.trim();
        (!version.is_empty()).then(|| version.to_string())
    }
}
