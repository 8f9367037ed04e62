//! Container runtime capability trait

use crate::error::Result;
use crate::event::LogEventStream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// What a container run needs from the declaration
#[derive(Debug, Clone)]
pub struct ContainerRunSpec {
    /// Deterministic container name (see [`crate::container_name`])
    pub name: String,
    /// Image reference, e.g. `postgres:16`
    pub image: String,
    /// Host ports published 1:1 into the container
    pub ports: Vec<u16>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Volume mounts in `host:container` form
    pub volumes: Vec<String>,
}

/// Result of looking a container up by name
#[derive(Debug, Clone)]
pub struct ContainerInspect {
    /// Container id
    pub id: String,
    /// Whether the container is currently running
    pub running: bool,
}

/// Capability set the orchestrator needs from a container runtime.
///
/// The production implementation shells out to the `docker` CLI
/// ([`crate::DockerCli`]); tests substitute an in-memory fake.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pull an image from its registry
    async fn pull(&self, image: &str) -> Result<()>;

    /// Whether the image is already present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Run a detached container, returning its id
    async fn run(&self, spec: &ContainerRunSpec) -> Result<String>;

    /// Gracefully stop a container by name or id
    async fn stop(&self, name_or_id: &str, timeout: Duration) -> Result<()>;

    /// Remove a container by name or id
    async fn remove(&self, name_or_id: &str) -> Result<()>;

    /// Look a container up by its exact name
    async fn inspect_by_name(&self, name: &str) -> Result<Option<ContainerInspect>>;

    /// Follow the container's log stream from now on
    async fn logs(&self, id: &str) -> Result<LogEventStream>;
}
