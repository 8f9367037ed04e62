//! # appdash-dashboard
//!
//! The control plane: an HTTP server on a localhost socket exposing
//! REST snapshots of services and health, a WebSocket channel pushing
//! service updates, SSE streams for health and logs, operator commands
//! that re-enter the orchestrator, and CRUD for log classification
//! rules.
//!
//! ## Example
//!
//! ```rust,no_run
//! use appdash_dashboard::DashboardServer;
//! use appdash_orchestration::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn example(orchestrator: Arc<Orchestrator>) -> appdash_dashboard::Result<()> {
//! let server = DashboardServer::bind(orchestrator.clone(), 3999).await?;
//! let shutdown = server.shutdown_handle();
//! # let _ = shutdown;
//! server.run().await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod http;
mod server;
mod view;

pub use server::{DashboardServer, ShutdownHandle};
pub use view::{
    all_service_views, health_report, service_view, HealthReport, HealthSummary, LocalView,
    ServiceHealthView, ServiceView, WsEnvelope,
};

/// Error types for control-plane operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A payload failed to serialize
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;
