//! Environment-tunable settings

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Tunables consumed from the environment, with spec'd defaults
#[derive(Debug, Clone)]
pub struct Settings {
    /// Control-plane listen port (`APP_DASHBOARD_PORT`)
    pub dashboard_port: u16,
    /// Graceful stop deadline per service (`APP_STOP_TIMEOUT_MS`)
    pub stop_timeout: Duration,
    /// Ready deadline per service (`APP_READY_TIMEOUT_MS`)
    pub ready_timeout: Duration,
    /// Per-service log ring capacity (`APP_LOG_BUFFER`)
    pub log_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dashboard_port: 3999,
            stop_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(60),
            log_buffer: 5000,
        }
    }
}

impl Settings {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dashboard_port: env_parse("APP_DASHBOARD_PORT").unwrap_or(defaults.dashboard_port),
            stop_timeout: env_parse("APP_STOP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_timeout),
            ready_timeout: env_parse("APP_READY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ready_timeout),
            log_buffer: env_parse("APP_LOG_BUFFER").unwrap_or(defaults.log_buffer),
        }
    }

    /// Project-scoped state directory holding the registry file
    pub fn state_dir(project: &str) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("appdash")
            .join(project)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_contract() {
        let s = Settings::default();
        assert_eq!(s.stop_timeout, Duration::from_secs(10));
        assert_eq!(s.ready_timeout, Duration::from_secs(60));
        assert_eq!(s.log_buffer, 5000);
    }

    #[test]
    fn state_dir_is_project_scoped() {
        let a = Settings::state_dir("proj-a");
        let b = Settings::state_dir("proj-b");
        assert_ne!(a, b);
        assert!(a.ends_with("appdash/proj-a"));
    }
}
