//! Log pipeline: ring buffers, classification and live fan-out
//!
//! Every captured line becomes a tagged [`LogEntry`]: classified at
//! ingest, appended to a bounded per-service ring, and pushed to live
//! subscribers through bounded queues. Ring replay never rewrites
//! entries that were classified under older rules.

use crate::subscription::{Publisher, Subscription, DEFAULT_DEPTH};
use appdash_launcher::{LogEvent, LogEventStream, LogSource};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic chatter
    Debug,
    /// Ordinary output
    Info,
    /// Something looks off
    Warn,
    /// Something failed
    Error,
}

/// One tagged log line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Service that produced the line
    pub service: String,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Classified severity
    pub level: LogLevel,
    /// The line itself
    pub message: String,
    /// Where the line came from
    pub source: LogSource,
}

/// A hot-reloadable classification rule: any line containing `text`
/// (case-sensitive) is raised to at least `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Case-sensitive substring to look for
    pub text: String,
    /// Level to raise matching lines to
    pub level: LogLevel,
}

/// The log pipeline for one project
pub struct LogPipeline {
    capacity: usize,
    rings: Mutex<HashMap<String, VecDeque<LogEntry>>>,
    rules: RwLock<Vec<ClassificationRule>>,
    publisher: Publisher<LogEntry>,
    detachers: Mutex<HashMap<String, async_channel::Sender<()>>>,
}

impl LogPipeline {
    /// Create a pipeline with the given per-service ring capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rings: Mutex::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
            publisher: Publisher::new(DEFAULT_DEPTH),
            detachers: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a raw event stream for a service.
    ///
    /// A single reader task per stream ingests until the stream ends or
    /// [`LogPipeline::detach`] is called for the service. Ingest errors
    /// never propagate to the caller.
    pub fn attach(self: &Arc<Self>, service: &str, mut events: LogEventStream) {
        let (detach_tx, detach_rx) = async_channel::bounded::<()>(1);
        self.detachers
            .lock()
            .expect("detach lock")
            .insert(service.to_string(), detach_tx);

        let pipeline = self.clone();
        let service = service.to_string();
        smol::spawn(async move {
            debug!(service = %service, "log reader attached");
            loop {
                let next = futures_lite::future::or(
                    async { events.next().await.map(Some) },
                    async {
                        let _ = detach_rx.recv().await;
                        Some(None)
                    },
                )
                .await;
                match next {
                    Some(Some(event)) => pipeline.ingest(&service, event),
                    Some(None) | None => break,
                }
            }
            debug!(service = %service, "log reader detached");
        })
        .detach();
    }

    /// Detach the reader for a service (its ring is kept)
    pub fn detach(&self, service: &str) {
        self.detachers.lock().expect("detach lock").remove(service);
    }

    /// Classify and record one captured line
    pub fn ingest(&self, service: &str, event: LogEvent) {
        let level = self.classify(&event.line, event.source);
        let entry = LogEntry {
            service: service.to_string(),
            timestamp: event.timestamp,
            level,
            message: event.line,
            source: event.source,
        };

        {
            let mut rings = self.rings.lock().expect("ring lock");
            let ring = rings.entry(service.to_string()).or_default();
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }

        self.publisher.publish(entry);
    }

    /// Replay up to `limit` most recent entries for a service
    pub fn tail(&self, service: &str, limit: usize) -> Vec<LogEntry> {
        let rings = self.rings.lock().expect("ring lock");
        match rings.get(service) {
            Some(ring) => ring.iter().rev().take(limit).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The last few lines of a service's output as one string, for
    /// failure reports
    pub fn excerpt(&self, service: &str, lines: usize) -> String {
        self.tail(service, lines)
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Subscribe to the live feed (all services; filter on the consumer side)
    pub fn subscribe(&self) -> Subscription<LogEntry> {
        self.publisher.subscribe()
    }

    /// Current classification rules
    pub fn rules(&self) -> Vec<ClassificationRule> {
        self.rules.read().expect("rules lock").clone()
    }

    /// Append a rule; applies to lines ingested from now on
    pub fn add_rule(&self, rule: ClassificationRule) {
        self.rules.write().expect("rules lock").push(rule);
    }

    /// Remove a rule by index; false if out of range
    pub fn remove_rule(&self, index: usize) -> bool {
        let mut rules = self.rules.write().expect("rules lock");
        if index < rules.len() {
            rules.remove(index);
            true
        } else {
            warn!(index, "classification rule index out of range");
            false
        }
    }

    /// Replace the whole rule set
    pub fn set_rules(&self, new_rules: Vec<ClassificationRule>) {
        *self.rules.write().expect("rules lock") = new_rules;
    }

    /// End all subscriptions
    pub fn shutdown(&self) {
        self.detachers.lock().expect("detach lock").clear();
        self.publisher.close();
    }

    fn classify(&self, line: &str, source: LogSource) -> LogLevel {
        let inferred = infer_level(line, source);
        let rules = self.rules.read().expect("rules lock");
        rules
            .iter()
            .filter(|rule| line.contains(&rule.text))
            .map(|rule| rule.level)
            .chain(std::iter::once(inferred))
            .max()
            .unwrap_or(inferred)
    }
}

/// Keyword inference when no rule matches
fn infer_level(line: &str, source: LogSource) -> LogLevel {
    let lower = line.to_lowercase();
    let keyword = if lower.contains("error") || lower.contains("exception") {
        LogLevel::Error
    } else if lower.contains("warn") {
        LogLevel::Warn
    } else if lower.contains("debug") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Stderr lines never read below warn.
    if source == LogSource::Stderr && keyword < LogLevel::Warn {
        LogLevel::Warn
    } else {
        keyword
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(line: &str, source: LogSource) -> LogEvent {
        LogEvent::now(source, line)
    }

    #[test]
    fn keyword_inference() {
        let pipeline = LogPipeline::new(16);
        pipeline.ingest("svc", event("Unhandled exception in worker", LogSource::Stdout));
        pipeline.ingest("svc", event("warning: low disk", LogSource::Stdout));
        pipeline.ingest("svc", event("debug: cache warm", LogSource::Stdout));
        pipeline.ingest("svc", event("listening on :8080", LogSource::Stdout));

        let levels: Vec<_> = pipeline.tail("svc", 10).iter().map(|e| e.level).collect();
        assert_eq!(
            levels,
            vec![LogLevel::Error, LogLevel::Warn, LogLevel::Debug, LogLevel::Info]
        );
    }

    #[test]
    fn stderr_defaults_to_warn_unless_elevated() {
        let pipeline = LogPipeline::new(16);
        pipeline.ingest("svc", event("plain stderr chatter", LogSource::Stderr));
        pipeline.ingest("svc", event("fatal error: boom", LogSource::Stderr));

        let levels: Vec<_> = pipeline.tail("svc", 10).iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Warn, LogLevel::Error]);
    }

    #[test]
    fn rules_upgrade_matching_lines() {
        let pipeline = LogPipeline::new(16);
        pipeline.add_rule(ClassificationRule {
            text: "Connection refused".to_string(),
            level: LogLevel::Error,
        });

        pipeline.ingest("svc", event("dial tcp: Connection refused", LogSource::Stdout));
        // Case-sensitive: lowercase variant does not match the rule, but
        // keyword inference does not trigger on "refused" either.
        pipeline.ingest("svc", event("connection refused (retrying)", LogSource::Stdout));

        let entries = pipeline.tail("svc", 10);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[1].level, LogLevel::Info);
    }

    #[test]
    fn rules_never_downgrade() {
        let pipeline = LogPipeline::new(16);
        pipeline.add_rule(ClassificationRule {
            text: "noisy but fine".to_string(),
            level: LogLevel::Debug,
        });
        pipeline.ingest("svc", event("error: noisy but fine", LogSource::Stdout));
        assert_eq!(pipeline.tail("svc", 1)[0].level, LogLevel::Error);
    }

    #[test]
    fn ring_is_bounded_and_keeps_the_newest() {
        let pipeline = LogPipeline::new(3);
        for i in 0..10 {
            pipeline.ingest("svc", event(&format!("line {i}"), LogSource::Stdout));
        }
        let messages: Vec<_> = pipeline
            .tail("svc", 10)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn replay_does_not_rewrite_old_entries() {
        let pipeline = LogPipeline::new(16);
        pipeline.ingest("svc", event("Connection refused early", LogSource::Stdout));

        pipeline.add_rule(ClassificationRule {
            text: "Connection refused".to_string(),
            level: LogLevel::Error,
        });
        pipeline.ingest("svc", event("Connection refused late", LogSource::Stdout));

        let entries = pipeline.tail("svc", 10);
        assert_eq!(entries[0].level, LogLevel::Info, "past entries keep their level");
        assert_eq!(entries[1].level, LogLevel::Error);
    }

    #[smol_potat::test]
    async fn subscribers_get_live_entries() {
        let pipeline = Arc::new(LogPipeline::new(16));
        let sub = pipeline.subscribe();

        pipeline.ingest("svc", event("hello", LogSource::Stdout));
        let entry = sub.recv().await.unwrap();
        assert_eq!(entry.message, "hello");
        assert_eq!(entry.service, "svc");
    }

    #[smol_potat::test]
    async fn attach_ingests_a_stream_until_detach() {
        let pipeline = Arc::new(LogPipeline::new(16));
        let (tx, rx) = async_channel::bounded::<LogEvent>(8);
        pipeline.attach("svc", Box::pin(rx));

        tx.send(event("streamed line", LogSource::Stdout))
            .await
            .unwrap();
        smol::Timer::after(std::time::Duration::from_millis(50)).await;
        assert_eq!(pipeline.tail("svc", 10).len(), 1);

        pipeline.detach("svc");
        smol::Timer::after(std::time::Duration::from_millis(50)).await;
        // Lines sent after detach are not ingested.
        let _ = tx.try_send(event("after detach", LogSource::Stdout));
        smol::Timer::after(std::time::Duration::from_millis(50)).await;
        assert_eq!(pipeline.tail("svc", 10).len(), 1);
    }
}
