//! Raw output events from launched services

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A single line of output captured from a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// When the line was captured
    pub timestamp: DateTime<Utc>,
    /// Which stream produced the line
    pub source: LogSource,
    /// The line, without its trailing newline
    pub line: String,
}

impl LogEvent {
    /// Create an event stamped with the current time
    pub fn now(source: LogSource, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            line: line.into(),
        }
    }
}

/// Source of a captured output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Standard output of a native process
    Stdout,
    /// Standard error of a native process
    Stderr,
    /// The log stream of a container
    Container,
}

/// Stream of output events from one service
pub type LogEventStream = BoxStream<'static, LogEvent>;
