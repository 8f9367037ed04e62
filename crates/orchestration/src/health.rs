//! Health state model and the cascading checker
//!
//! One observation runs the cascade HTTP → TCP → process liveness and
//! produces a candidate status; hysteresis over candidates lives in the
//! monitor (`health_monitor`).

use crate::config::{HealthCheckConfig, HealthCheckKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{AsyncReadExt, AsyncWriteExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::trace;

/// Observed health of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The cascade concluded the service is up
    Healthy,
    /// The service answered but reported degradation
    Degraded,
    /// The cascade concluded the service is down
    Unhealthy,
    /// No observation yet
    Unknown,
    /// Health checking does not apply (no check, or service not running)
    Na,
}

/// Full health record for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    /// Current (hysteresis-filtered) status
    pub status: HealthStatus,
    /// What kind of check produced it
    pub check_type: HealthCheckKind,
    /// Probe round-trip time, when a probe ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// HTTP status code, when the http stage answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Consecutive failed observations
    pub consecutive_failures: u32,
    /// Most recent probe error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the last observation ran
    pub checked_at: DateTime<Utc>,
    /// Seconds since monitoring of this service began
    pub uptime_sec: u64,
}

impl HealthState {
    pub(crate) fn initial(check_type: HealthCheckKind) -> Self {
        Self {
            status: HealthStatus::Unknown,
            check_type,
            response_time_ms: None,
            status_code: None,
            consecutive_failures: 0,
            last_error: None,
            checked_at: Utc::now(),
            uptime_sec: 0,
        }
    }
}

/// Liveness oracle for the final cascade stage.
///
/// The orchestrator backs this with its registry (pid liveness for native
/// services, a container-runtime inspect for containers).
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Whether the service's process or container is alive right now
    async fn is_alive(&self, service: &str) -> bool;
}

/// Result of running one cascade
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Candidate status for hysteresis
    pub status: HealthStatus,
    /// Probe round-trip time
    pub response_time_ms: u64,
    /// HTTP status code when the http stage answered
    pub status_code: Option<u16>,
    /// Failure detail when the candidate is unhealthy
    pub error: Option<String>,
}

/// What the http stage decided
enum HttpVerdict {
    Conclusive(HealthStatus, u16),
    /// Keep cascading: timeout, refused connection, or a 400 answer
    /// (the port may speak a non-HTTP protocol; port liveness decides).
    Inconclusive(Option<u16>),
}

/// Run the full cascade for one service once
pub(crate) async fn run_cascade(
    service: &str,
    spec: &HealthCheckConfig,
    probe: &dyn LivenessProbe,
) -> ProbeOutcome {
    let started = Instant::now();
    let timeout = Duration::from_millis(spec.timeout_ms);
    let port = spec.port.unwrap_or(0);
    let mut status_code = None;

    // Stage (a): HTTP
    if spec.kind == HealthCheckKind::Http && port > 0 {
        let endpoint = spec.endpoint.as_deref().unwrap_or("/");
        match http_stage(port, endpoint, timeout).await {
            HttpVerdict::Conclusive(status, code) => {
                trace!(service, code, ?status, "http probe concluded");
                return ProbeOutcome {
                    status,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    status_code: Some(code),
                    error: match status {
                        HealthStatus::Unhealthy => {
                            Some(format!("endpoint {endpoint} answered {code}"))
                        }
                        _ => None,
                    },
                };
            }
            HttpVerdict::Inconclusive(code) => {
                trace!(service, ?code, "http probe inconclusive, cascading");
                status_code = code;
            }
        }
    }

    // Stage (b): TCP connect
    if port > 0 && spec.kind != HealthCheckKind::Process {
        if tcp_stage(port, timeout).await {
            return ProbeOutcome {
                status: HealthStatus::Healthy,
                response_time_ms: started.elapsed().as_millis() as u64,
                status_code,
                error: None,
            };
        }
    }

    // Stage (c): process / container liveness
    let alive = probe.is_alive(service).await;
    ProbeOutcome {
        status: if alive {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        response_time_ms: started.elapsed().as_millis() as u64,
        status_code,
        error: if alive {
            None
        } else {
            Some("process is not running".to_string())
        },
    }
}

async fn http_stage(port: u16, endpoint: &str, timeout: Duration) -> HttpVerdict {
    let attempt = async {
        let mut stream =
            async_net::TcpStream::connect(("127.0.0.1", port)).await.ok()?;
        let request = format!(
            "GET {endpoint} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nAccept: */*\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.ok()?;

        let mut response = Vec::with_capacity(1024);
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    response.extend_from_slice(&buf[..n]);
                    if response.len() >= 64 * 1024 {
                        break;
                    }
                }
            }
        }
        parse_response(&response)
    };

    let result = futures_lite::future::or(attempt, async {
        smol::Timer::after(timeout).await;
        None
    })
    .await;

    match result {
        Some((code, body)) => match code {
            400 => HttpVerdict::Inconclusive(Some(code)),
            503 => HttpVerdict::Conclusive(HealthStatus::Degraded, code),
            _ if body.contains(r#""status":"degraded""#) => {
                HttpVerdict::Conclusive(HealthStatus::Degraded, code)
            }
            200..=399 => HttpVerdict::Conclusive(HealthStatus::Healthy, code),
            _ => HttpVerdict::Conclusive(HealthStatus::Unhealthy, code),
        },
        None => HttpVerdict::Inconclusive(None),
    }
}

/// Parse an HTTP/1.x response into (status code, body)
fn parse_response(raw: &[u8]) -> Option<(u16, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut parts = text.splitn(2, "\r\n\r\n");
    let head = parts.next()?;
    let body = parts.next().unwrap_or("").to_string();
    let status_line = head.lines().next()?;
    let code: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;
    Some((code, body))
}

async fn tcp_stage(port: u16, timeout: Duration) -> bool {
    futures_lite::future::or(
        async {
            async_net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_ok()
        },
        async {
            smol::Timer::after(timeout).await;
            false
        },
    )
    .await
}
