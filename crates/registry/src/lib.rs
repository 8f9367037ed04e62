//! # appdash-registry
//!
//! Crash-safe mapping from service name to its live identity (pid or
//! container id, port, status, mode, start time), persisted as a single
//! JSON document so a restarted dashboard or CLI can reconcile with
//! whatever is still running.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod models;
mod registry;

pub use models::{Mode, RegistryEntry, ServiceKind, ServiceStatus};
pub use registry::Registry;

use thiserror::Error;

/// Error type for registry operations
#[derive(Error, Debug)]
pub enum Error {
    /// The registry file exists but cannot be parsed.
    ///
    /// A corrupt file aborts the load; it is never silently wiped.
    #[error("registry file {path} is corrupt: {reason}")]
    Corrupt {
        /// Path of the offending file
        path: String,
        /// Parser diagnostic
        reason: String,
    },

    /// No entry with that name
    #[error("service not registered: {0}")]
    NotFound(String),

    /// An entry with that name already exists
    #[error("service already registered: {0}")]
    Exists(String),

    /// I/O error while reading or persisting the file
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;
