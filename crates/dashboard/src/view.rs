//! Wire shapes served by the control plane

use appdash_orchestration::{HealthState, HealthStatus, Orchestrator, ServiceStatus};
use appdash_registry::ServiceKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One service as the dashboard sees it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    /// Service name
    pub name: String,
    /// Declared language hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Declared framework hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Local (this machine) state
    pub local: LocalView,
}

/// Local state block of a [`ServiceView`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalView {
    /// Registry status
    pub status: ServiceStatus,
    /// Health status, when monitored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    /// Convenience URL for ported services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Primary port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Pid for native services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Container id for container services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// When the service launched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When health last looked at it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

/// Envelope pushed on the bidirectional channel
#[derive(Debug, Clone, Serialize)]
pub struct WsEnvelope {
    /// `services`, `add`, `update` or `remove`
    #[serde(rename = "type")]
    pub kind: String,
    /// Single-service payload for add/update/remove
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceView>,
    /// Bulk payload for the initial `services` frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceView>>,
}

/// One service inside a health report
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthView {
    /// Service name
    pub service: String,
    /// Full health record
    #[serde(flatten)]
    pub state: HealthState,
}

/// Counts across a health report
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSummary {
    /// Services in the report
    pub total: usize,
    /// Currently healthy
    pub healthy: usize,
    /// Currently degraded
    pub degraded: usize,
    /// Currently unhealthy
    pub unhealthy: usize,
    /// Unknown or not applicable
    pub other: usize,
}

/// Full health report, also the SSE `health` frame payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Always `health`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// When the report was assembled
    pub timestamp: DateTime<Utc>,
    /// Per-service records
    pub services: Vec<ServiceHealthView>,
    /// Aggregate counts
    pub summary: HealthSummary,
}

/// Assemble the current full health report
pub fn health_report(orchestrator: &Orchestrator, filter: Option<&[String]>) -> HealthReport {
    let mut services = Vec::new();
    let mut summary = HealthSummary::default();

    for (name, state) in orchestrator.health().snapshot() {
        if let Some(filter) = filter {
            if !filter.iter().any(|f| f == &name) {
                continue;
            }
        }
        summary.total += 1;
        match state.status {
            HealthStatus::Healthy => summary.healthy += 1,
            HealthStatus::Degraded => summary.degraded += 1,
            HealthStatus::Unhealthy => summary.unhealthy += 1,
            HealthStatus::Unknown | HealthStatus::Na => summary.other += 1,
        }
        services.push(ServiceHealthView {
            service: name,
            state,
        });
    }

    HealthReport {
        kind: "health",
        timestamp: Utc::now(),
        services,
        summary,
    }
}

/// Build the view of one service from registry + health + declaration
pub async fn service_view(orchestrator: &Orchestrator, name: &str) -> Option<ServiceView> {
    let entry = orchestrator.registry().get(name).await.ok()?;
    let declared = orchestrator.project().service(name);
    let health = orchestrator.health().get(name);

    let port = (entry.port > 0).then_some(entry.port);
    let launched = entry.status != ServiceStatus::NotStarted;
    Some(ServiceView {
        name: entry.name.clone(),
        language: declared
            .map(|s| s.language.clone())
            .filter(|l| !l.is_empty()),
        framework: declared.and_then(|s| s.framework.clone()),
        local: LocalView {
            status: entry.status,
            health: health.as_ref().map(|h| h.status),
            url: port.map(|p| format!("http://localhost:{p}")),
            port,
            pid: (entry.kind == ServiceKind::Native && entry.pid > 0).then_some(entry.pid),
            container_id: (!entry.container_id.is_empty()).then(|| entry.container_id.clone()),
            start_time: launched.then_some(entry.start_time),
            last_checked: health.map(|h| h.checked_at),
        },
    })
}

/// Build views for every known service, sorted by name
pub async fn all_service_views(orchestrator: &Orchestrator) -> Vec<ServiceView> {
    let mut views = Vec::new();
    for entry in orchestrator.registry().list_all().await {
        if let Some(view) = service_view(orchestrator, &entry.name).await {
            views.push(view);
        }
    }
    views
}
