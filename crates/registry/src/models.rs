//! Persisted registry entry and its enumerations
//!
//! The on-disk shape is part of the external contract: a JSON document
//! keyed by service name, each value carrying exactly
//! `{name, pid, containerId, port, status, mode, type, startTime}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a service runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// A native process we spawned
    Native,
    /// A container managed through the container runtime
    Container,
}

/// Lifecycle mode of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Long-running service
    Daemon,
    /// Long-running with file watching / auto-reload
    Watch,
    /// Runs once and exits (hook scripts, migrations)
    Task,
    /// Build step that must complete before dependents start
    Build,
}

/// Current status of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceStatus {
    /// Launched, waiting for the ready barrier
    Starting,
    /// Passed the ready barrier
    Running,
    /// Stop in progress
    Stopping,
    /// Stopped by an operator or observed dead
    Stopped,
    /// Launch or ready wait failed, or a task exited non-zero
    Failed,
    /// A task or build exited with code 0
    Completed,
    /// Declared but never launched in this session
    NotStarted,
}

impl ServiceStatus {
    /// States in which health checking is meaningful
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// One persisted service record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Service name (unique key)
    pub name: String,
    /// Pid of the process-group leader, 0 for containers
    pub pid: u32,
    /// Container id, empty for native services
    pub container_id: String,
    /// Primary port, 0 when the service has none
    pub port: u16,
    /// Current status
    pub status: ServiceStatus,
    /// Lifecycle mode
    pub mode: Mode,
    /// Native or container
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    /// When the service was last launched
    pub start_time: DateTime<Utc>,
}

impl RegistryEntry {
    /// Create an entry for a freshly launched native process
    pub fn native(name: impl Into<String>, pid: u32, port: u16, mode: Mode) -> Self {
        Self {
            name: name.into(),
            pid,
            container_id: String::new(),
            port,
            status: ServiceStatus::Starting,
            mode,
            kind: ServiceKind::Native,
            start_time: Utc::now(),
        }
    }

    /// Create an entry for a freshly launched container
    pub fn container(
        name: impl Into<String>,
        container_id: impl Into<String>,
        port: u16,
        mode: Mode,
    ) -> Self {
        Self {
            name: name.into(),
            pid: 0,
            container_id: container_id.into(),
            port,
            status: ServiceStatus::Starting,
            mode,
            kind: ServiceKind::Container,
            start_time: Utc::now(),
        }
    }
}
