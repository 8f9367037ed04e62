//! # appdash-orchestration
//!
//! The core of appdash: derives a runtime for each declared service,
//! builds the dependency DAG, starts services in topological waves with
//! per-service readiness gating, keeps an independent health monitor
//! ticking, pipes all service output through a bounded log pipeline, and
//! tears everything down cleanly.
//!
//! ## Example
//!
//! ```rust,no_run
//! use appdash_orchestration::{Orchestrator, Project, Settings, StartOptions};
//! use appdash_launcher::DockerCli;
//! use std::sync::Arc;
//!
//! # async fn example(project: Project) -> anyhow::Result<()> {
//! let settings = Settings::from_env();
//! let orchestrator =
//!     Orchestrator::open(project, settings, Arc::new(DockerCli::new())).await?;
//! orchestrator.start(StartOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod events;
mod graph;
mod health;
mod health_monitor;
mod logs;
mod orchestrator;
mod runtime;
mod settings;
mod state_monitor;
mod subscription;

pub use config::{HealthCheckConfig, HealthCheckKind, Project, Service};
pub use events::{ServiceEvent, ServiceEvents};
pub use graph::DependencyGraph;
pub use health::{HealthState, HealthStatus, LivenessProbe};
pub use health_monitor::{HealthChangeEvent, HealthMonitor};
pub use logs::{ClassificationRule, LogEntry, LogLevel, LogPipeline};
pub use orchestrator::{Orchestrator, ServiceProcess, StartOptions, StopOptions};
pub use runtime::{detect_runtime, LaunchPlan, Runtime};
pub use settings::Settings;
pub use state_monitor::{Notifier, Severity, StateMonitor, Transition};
pub use subscription::Subscription;

// The registry's enums are the single source of truth for status, mode
// and kind; re-exported so callers rarely need both crates in scope.
pub use appdash_registry::{Mode, ServiceKind, ServiceStatus};

/// One failed service in an aborted start, as reported to the user
#[derive(Debug, Clone)]
pub struct StartFailure {
    /// Service name
    pub name: String,
    /// Error kind (the taxonomy variant that produced this failure)
    pub kind: String,
    /// Underlying error message
    pub message: String,
    /// Tail of the service's captured log output
    pub log_excerpt: String,
}

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No runtime could be derived for a service; fatal before any launch
    #[error("no runtime for service '{service}': {reason}")]
    Unsupported {
        /// The service that could not be matched to a runtime
        service: String,
        /// Why detection failed
        reason: String,
    },

    /// A native spawn or container run failed
    #[error("failed to launch '{service}': {message}")]
    Launch {
        /// The service that failed to launch
        service: String,
        /// Captured diagnostic
        message: String,
    },

    /// A service missed its ready deadline
    #[error("service '{0}' did not become ready within its deadline")]
    ReadyTimeout(String),

    /// The dependency graph contains a cycle
    #[error("dependency cycle among services: {0:?}")]
    Cycle(Vec<String>),

    /// A `dependsOn` entry names a service that is not declared
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDep {
        /// The service with the dangling reference
        service: String,
        /// The missing dependency name
        dependency: String,
    },

    /// The project declaration itself is invalid
    #[error("invalid project: {0}")]
    Project(String),

    /// Graceful stop did not complete; the service was terminated forcibly
    #[error("service '{0}' did not stop gracefully")]
    StopStuck(String),

    /// The launch phase failed; everything already started was rolled back
    #[error("start aborted, {} service(s) failed", .0.len())]
    StartAborted(Vec<StartFailure>),

    /// A health check could not be performed at all
    #[error("health check error: {0}")]
    Health(String),

    /// The named service is not part of this project
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Registry persistence failure
    #[error(transparent)]
    Registry(#[from] appdash_registry::Error),

    /// Launcher failure
    #[error(transparent)]
    Launcher(#[from] appdash_launcher::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short kind string for control-plane payloads (`{"kind": …}`)
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unsupported { .. } => "unsupported",
            Error::Launch { .. } => "launch",
            Error::ReadyTimeout(_) => "readyTimeout",
            Error::Cycle(_) => "cycle",
            Error::UnknownDep { .. } => "unknownDep",
            Error::Project(_) => "project",
            Error::StopStuck(_) => "stopStuck",
            Error::StartAborted(_) => "startAborted",
            Error::Health(_) => "health",
            Error::ServiceNotFound(_) => "serviceNotFound",
            Error::Registry(_) => "registry",
            Error::Launcher(_) => "launch",
            Error::Io(_) => "io",
        }
    }

    /// Whether this error is the caller's fault (4xx) rather than ours (5xx)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Project(_)
                | Error::UnknownDep { .. }
                | Error::Cycle(_)
                | Error::ServiceNotFound(_)
                | Error::Unsupported { .. }
        )
    }
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;
