//! Health Engine (§4.6).
//!
//! Evaluates each target's `HealthCheckSpec` on demand and aggregates
//! the per-target verdicts into an overall status, matching the
//! `{status, totalDuration, checks}` report shape in §6.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{HealthCheckKind, HealthCheckSpec, RelayConfig};

const CHECK_DEADLINE: Duration = Duration::from_secs(5);

/// Overall aggregate health verdict (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Per-target verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    Skipped,
}

/// One target's health result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(rename = "type")]
    pub kind: Option<HealthCheckKind>,
    pub reason: Option<String>,
    pub duration_ms: u64,
}

/// The full report returned by `/health*` (§6).
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub total_duration_ms: u64,
    pub checks: Vec<CheckResult>,
}

/// Run every target's health check concurrently and aggregate.
pub async fn run(config: &RelayConfig, http: &reqwest::Client) -> HealthReport {
    let started = Instant::now();

    let futures = config.targets.iter().map(|(name, target)| {
        let name = name.clone();
        let spec = target.health_check.clone();
        async move {
            let (status, kind, reason, duration) = match spec {
                None => (CheckStatus::Skipped, None, None, Duration::ZERO),
                Some(spec) if !spec.enabled => (CheckStatus::Skipped, Some(spec.kind), None, Duration::ZERO),
                Some(spec) => run_one(&spec, http).await,
            };
            CheckResult {
                name,
                status,
                kind,
                reason,
                duration_ms: duration.as_millis() as u64,
            }
        }
    });

    let checks: Vec<CheckResult> = futures_util::future::join_all(futures).await;

    let healthy = checks.iter().filter(|c| c.status == CheckStatus::Healthy).count();
    let unhealthy = checks.iter().filter(|c| c.status == CheckStatus::Unhealthy).count();

    let status = if unhealthy == 0 {
        OverallStatus::Healthy
    } else if healthy > 0 {
        OverallStatus::Degraded
    } else {
        OverallStatus::Unhealthy
    };

    HealthReport {
        status,
        total_duration_ms: started.elapsed().as_millis() as u64,
        checks,
    }
}

async fn run_one(
    spec: &HealthCheckSpec,
    http: &reqwest::Client,
) -> (CheckStatus, Option<HealthCheckKind>, Option<String>, Duration) {
    let started = Instant::now();
    let outcome = match spec.kind {
        HealthCheckKind::TcpConnect => tcp_connect(&spec.url).await,
        HealthCheckKind::HttpGet => http_get(&spec.url, &spec.expected_status_codes, http).await,
        HealthCheckKind::HttpPost => {
            http_post(&spec.url, spec.body.as_deref(), &spec.content_type, &spec.expected_status_codes, http).await
        }
    };
    let duration = started.elapsed();
    match outcome {
        Ok(()) => (CheckStatus::Healthy, Some(spec.kind), None, duration),
        Err(reason) => (CheckStatus::Unhealthy, Some(spec.kind), Some(reason), duration),
    }
}

async fn tcp_connect(url: &url::Url) -> Result<(), String> {
    let host = url.host_str().ok_or_else(|| "health check URL has no host".to_string())?;
    let port = url.port_or_known_default().unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
    match timeout(CHECK_DEADLINE, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(format!("tcp connect failed: {e}")),
        Err(_) => Err("tcp connect timed out".to_string()),
    }
}

/// Status 401 is always healthy (§3 invariant): it proves the service
/// is up and responding, even though the relay's own probe is
/// unauthenticated.
fn is_healthy_status(status: u16, expected: &[u16]) -> bool {
    status == 401 || expected.contains(&status)
}

async fn http_get(url: &url::Url, expected: &[u16], http: &reqwest::Client) -> Result<(), String> {
    let response = timeout(CHECK_DEADLINE, http.get(url.clone()).send())
        .await
        .map_err(|_| "http get timed out".to_string())?
        .map_err(|e| format!("http get failed: {e}"))?;
    let status = response.status().as_u16();
    if is_healthy_status(status, expected) {
        Ok(())
    } else {
        Err(format!("unexpected status {status}"))
    }
}

async fn http_post(
    url: &url::Url,
    body: Option<&str>,
    content_type: &str,
    expected: &[u16],
    http: &reqwest::Client,
) -> Result<(), String> {
    let request = http
        .post(url.clone())
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(body.unwrap_or_default().to_string());
    let response = timeout(CHECK_DEADLINE, request.send())
        .await
        .map_err(|_| "http post timed out".to_string())?
        .map_err(|e| format!("http post failed: {e}"))?;
    let status = response.status().as_u16();
    if is_healthy_status(status, expected) {
        Ok(())
    } else {
        Err(format!("unexpected status {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_is_always_healthy() {
        assert!(is_healthy_status(401, &[200]));
        assert!(is_healthy_status(200, &[200]));
        assert!(!is_healthy_status(500, &[200]));
    }

    #[tokio::test]
    async fn http_get_honors_expected_status_codes() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/health"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let url = url::Url::parse(&format!("{}/health", server.uri())).unwrap();
        let result = http_get(&url, &[200], &reqwest::Client::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn http_get_accepts_configured_status() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/health"))
            .respond_with(wiremock::ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let url = url::Url::parse(&format!("{}/health", server.uri())).unwrap();
        let result = http_get(&url, &[204], &reqwest::Client::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn tcp_connect_fails_fast_on_closed_port() {
        let url = url::Url::parse("http://127.0.0.1:1").unwrap();
        let result = tcp_connect(&url).await;
        assert!(result.is_err());
    }
}
