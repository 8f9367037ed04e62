//! Container launcher
//!
//! Runs a service as a detached container with a deterministic name, so
//! that stop and reconciliation never depend on a cached container id.

use crate::driver::{ContainerDriver, ContainerRunSpec};
use crate::error::Result;
use crate::event::LogEventStream;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Deterministic container name for a service
pub fn container_name(service: &str) -> String {
    format!("app-{service}")
}

/// A successfully launched (or adopted) container service
pub struct ContainerLaunch {
    /// Container id as reported by the runtime
    pub container_id: String,
    /// Live container log stream
    pub events: LogEventStream,
    /// When the container was started or adopted
    pub started_at: DateTime<Utc>,
    /// True when a pre-existing running container was adopted as-is
    pub adopted: bool,
}

/// Launcher for containerized services
pub struct ContainerLauncher {
    driver: Arc<dyn ContainerDriver>,
}

impl ContainerLauncher {
    /// Create a launcher on top of a container driver
    pub fn new(driver: Arc<dyn ContainerDriver>) -> Self {
        Self { driver }
    }

    /// Access the underlying driver
    pub fn driver(&self) -> &Arc<dyn ContainerDriver> {
        &self.driver
    }

    /// Start the container for `spec`.
    ///
    /// When `restart_containers` is set, any pre-existing container with
    /// the deterministic name is stopped and removed first; otherwise a
    /// running one is adopted and a stopped one is cleared out of the way.
    pub async fn launch(
        &self,
        spec: &ContainerRunSpec,
        restart_containers: bool,
        stop_timeout: Duration,
    ) -> Result<ContainerLaunch> {
        if let Some(existing) = self.driver.inspect_by_name(&spec.name).await? {
            match (existing.running, restart_containers) {
                (true, false) => {
                    info!(name = %spec.name, id = %existing.id, "adopting running container");
                    let events = self.driver.logs(&existing.id).await?;
                    return Ok(ContainerLaunch {
                        container_id: existing.id,
                        events,
                        started_at: Utc::now(),
                        adopted: true,
                    });
                }
                (true, true) => {
                    info!(name = %spec.name, "restart requested, replacing running container");
                    self.driver.stop(&spec.name, stop_timeout).await?;
                    self.driver.remove(&spec.name).await?;
                }
                (false, _) => {
                    debug!(name = %spec.name, "removing stopped leftover container");
                    self.driver.remove(&spec.name).await?;
                }
            }
        }

        if !self.driver.image_exists(&spec.image).await? {
            self.driver.pull(&spec.image).await?;
        }

        let container_id = self.driver.run(spec).await?;
        let events = self.driver.logs(&container_id).await?;

        Ok(ContainerLaunch {
            container_id,
            events,
            started_at: Utc::now(),
            adopted: false,
        })
    }

    /// Stop and remove the container for `service`, by name.
    ///
    /// A container that no longer exists counts as stopped.
    pub async fn stop(&self, service: &str, stop_timeout: Duration) -> Result<()> {
        let name = container_name(service);
        match self.driver.stop(&name, stop_timeout).await {
            Ok(()) => {}
            Err(crate::Error::ContainerNotFound { .. }) => {
                debug!(name, "container already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        match self.driver.remove(&name).await {
            Ok(()) | Err(crate::Error::ContainerNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
