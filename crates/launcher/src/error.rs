//! Error types for service launching

use thiserror::Error;

/// Unified error type for launcher operations
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a native process
    #[error("failed to spawn {command}: {reason}")]
    SpawnFailed {
        /// The command that could not be spawned
        command: String,
        /// The reason for the spawn failure
        reason: String,
        /// Pre-launch diagnostic, e.g. the advisory port check result
        diagnostic: Option<String>,
    },

    /// Failed to send a signal to a process group
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// A container runtime invocation failed
    #[error("container runtime failed: {reason}")]
    ContainerFailed {
        /// What the runtime reported
        reason: String,
        /// First 4 KiB of the runtime's stderr
        stderr: String,
    },

    /// Container not found by its deterministic name
    #[error("container not found: {name}")]
    ContainerNotFound {
        /// The container name that was not found
        name: String,
    },

    /// A graceful stop did not complete within its deadline
    #[error("process group did not stop within {timeout_ms} ms")]
    StopTimeout {
        /// The deadline that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling)
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(
        command: impl Into<String>,
        reason: impl Into<String>,
        diagnostic: Option<String>,
    ) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            reason: reason.into(),
            diagnostic,
        }
    }

    /// Create a container runtime error, truncating stderr to 4 KiB
    pub fn container_failed(reason: impl Into<String>, stderr: &str) -> Self {
        Self::ContainerFailed {
            reason: reason.into(),
            stderr: truncate_excerpt(stderr),
        }
    }
}

/// Cap a captured stderr excerpt at 4 KiB, on a char boundary
pub(crate) fn truncate_excerpt(s: &str) -> String {
    const CAP: usize = 4096;
    if s.len() <= CAP {
        return s.to_string();
    }
    let mut end = CAP;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Result type alias for launcher operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_is_capped_at_4k() {
        let long = "x".repeat(10_000);
        let err = Error::container_failed("run failed", &long);
        match err {
            Error::ContainerFailed { stderr, .. } => assert_eq!(stderr.len(), 4096),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let mut long = "y".repeat(4095);
        long.push('é');
        long.push_str(&"z".repeat(100));
        let truncated = truncate_excerpt(&long);
        assert!(truncated.len() <= 4096);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
