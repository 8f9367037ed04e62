//! Declared project and service model
//!
//! This is the input to the orchestrator: a loaded, already-parsed
//! project declaration. The file format and its validation live with the
//! (external) project loader; only semantic validation happens here.

use crate::{Error, Result};
use appdash_registry::Mode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Kind of health check declared for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// HTTP GET against an endpoint on the service's port
    Http,
    /// TCP connect against the service's port
    Tcp,
    /// Process (or container) liveness only
    Process,
    /// No health checking; the service is ready as soon as it launches
    None,
}

/// Declared health check parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// What to probe
    pub kind: HealthCheckKind,
    /// HTTP path, e.g. `/health` (http checks only)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Port override; defaults to the service's first declared port
    #[serde(default)]
    pub port: Option<u16>,
    /// Interval between checks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Timeout for a single probe in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive failures before a transition to unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive successes before a healthy transition
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_interval_ms() -> u64 {
    5000
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_success_threshold() -> u32 {
    1
}

impl HealthCheckConfig {
    /// A check of the given kind with default cadence and thresholds
    pub fn of_kind(kind: HealthCheckKind) -> Self {
        Self {
            kind,
            endpoint: None,
            port: None,
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// One declared service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Unique service name
    pub name: String,
    /// Implementation language hint, e.g. `node`, `python`
    #[serde(default)]
    pub language: String,
    /// Framework hint, e.g. `flask`, `express`
    #[serde(default)]
    pub framework: Option<String>,
    /// Explicit launch command (run through `sh -c`), overriding language
    /// detection; how hook scripts declare what to run
    #[serde(default)]
    pub command: Option<String>,
    /// Directory containing the service's sources
    pub project_path: PathBuf,
    /// Container image; a non-empty value makes this a container service
    #[serde(default)]
    pub image: Option<String>,
    /// Declared ports, first one is the primary
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Service-level environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Names of services that must be ready before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Health check declaration; `None` derives one from the runtime
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    /// Lifecycle mode
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

fn default_mode() -> Mode {
    Mode::Daemon
}

impl Service {
    /// The service's primary port, 0 when it declares none
    pub fn primary_port(&self) -> u16 {
        self.ports.first().copied().unwrap_or(0)
    }
}

/// A loaded project: the orchestrator's whole world for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project name; scopes the state directory and registry file
    pub name: String,
    /// Project-level environment applied to every service
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// The declared services
    pub services: Vec<Service>,
}

impl Project {
    /// Semantic validation: unique names, known dependency references,
    /// per-service port uniqueness. Cycle detection is the graph's job.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(Error::Project("service with empty name".to_string()));
            }
            if !names.insert(service.name.as_str()) {
                return Err(Error::Project(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
            let mut ports = HashSet::new();
            for port in &service.ports {
                if !ports.insert(port) {
                    return Err(Error::Project(format!(
                        "service '{}' declares port {} twice",
                        service.name, port
                    )));
                }
            }
        }
        for service in &self.services {
            for dep in &service.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(Error::UnknownDep {
                        service: service.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Find a service by name
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }
}
