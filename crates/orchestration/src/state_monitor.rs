//! Significant-event derivation from registry and health snapshots
//!
//! Polls both surfaces on an interval, diffs against the previous
//! snapshot, and emits transitions (crash, degradation, recovery) with a
//! severity, keeping a small ring of recent events for queries.

use crate::health::HealthStatus;
use crate::health_monitor::HealthMonitor;
use crate::subscription::{Publisher, Subscription, DEFAULT_DEPTH};
use appdash_registry::{Registry, ServiceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// How many recent transitions are kept for queries
const RING_CAPACITY: usize = 256;

/// How important a transition is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine lifecycle movement
    Info,
    /// Something worth a look
    Warn,
    /// A service crashed or went unhealthy
    Critical,
}

/// One derived state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// The service that moved
    pub service: String,
    /// State before
    pub previous: String,
    /// State after
    pub next: String,
    /// How important this is
    pub severity: Severity,
    /// When the transition was observed
    pub timestamp: DateTime<Utc>,
    /// Human-readable one-liner
    pub description: String,
}

/// Optional OS-notification hook fed warn/critical transitions
pub trait Notifier: Send + Sync {
    /// Called for every warn or critical transition
    fn notify(&self, transition: &Transition);
}

#[derive(Clone, PartialEq, Eq)]
struct Observed {
    status: ServiceStatus,
    health: Option<HealthStatus>,
}

/// Derives significant events by polling registry and health state
pub struct StateMonitor {
    registry: Arc<Registry>,
    health: Arc<HealthMonitor>,
    publisher: Arc<Publisher<Transition>>,
    ring: Arc<Mutex<VecDeque<Transition>>>,
    notifier: Option<Arc<dyn Notifier>>,
    interval: Duration,
    cancel: Mutex<Option<async_channel::Sender<()>>>,
}

impl StateMonitor {
    /// Create a monitor with the default 5 s poll interval
    pub fn new(registry: Arc<Registry>, health: Arc<HealthMonitor>) -> Self {
        Self {
            registry,
            health,
            publisher: Arc::new(Publisher::new(DEFAULT_DEPTH)),
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
            notifier: None,
            interval: Duration::from_secs(5),
            cancel: Mutex::new(None),
        }
    }

    /// Override the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Attach an OS-notification hook
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start the polling task
    pub fn start(self: &Arc<Self>) {
        let (cancel_tx, cancel_rx) = async_channel::bounded::<()>(1);
        *self.cancel.lock().expect("cancel lock") = Some(cancel_tx);

        let monitor = self.clone();
        smol::spawn(async move {
            let mut previous: HashMap<String, Observed> = HashMap::new();
            loop {
                let current = monitor.observe().await;
                for transition in derive_transitions(&previous, &current) {
                    monitor.record(transition);
                }
                previous = current;

                let cancelled = futures_lite::future::or(
                    async {
                        smol::Timer::after(monitor.interval).await;
                        false
                    },
                    async {
                        let _ = cancel_rx.recv().await;
                        true
                    },
                )
                .await;
                if cancelled {
                    break;
                }
            }
        })
        .detach();
    }

    /// Stop the polling task
    pub fn stop(&self) {
        self.cancel.lock().expect("cancel lock").take();
    }

    /// The most recent transitions, oldest first
    pub fn recent(&self) -> Vec<Transition> {
        self.ring.lock().expect("ring lock").iter().cloned().collect()
    }

    /// Subscribe to future transitions
    pub fn subscribe(&self) -> Subscription<Transition> {
        self.publisher.subscribe()
    }

    async fn observe(&self) -> HashMap<String, Observed> {
        let health = self.health.snapshot();
        self.registry
            .list_all()
            .await
            .into_iter()
            .map(|entry| {
                let health_status = health.get(&entry.name).map(|state| state.status);
                (
                    entry.name,
                    Observed {
                        status: entry.status,
                        health: health_status,
                    },
                )
            })
            .collect()
    }

    fn record(&self, transition: Transition) {
        info!(
            service = %transition.service,
            severity = ?transition.severity,
            "{}",
            transition.description
        );
        {
            let mut ring = self.ring.lock().expect("ring lock");
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(transition.clone());
        }
        if transition.severity != Severity::Info {
            if let Some(notifier) = &self.notifier {
                notifier.notify(&transition);
            }
        }
        self.publisher.publish(transition);
    }
}

fn status_label(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Starting => "starting",
        ServiceStatus::Running => "running",
        ServiceStatus::Stopping => "stopping",
        ServiceStatus::Stopped => "stopped",
        ServiceStatus::Failed => "failed",
        ServiceStatus::Completed => "completed",
        ServiceStatus::NotStarted => "notStarted",
    }
}

fn health_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Unknown => "unknown",
        HealthStatus::Na => "na",
    }
}

fn derive_transitions(
    previous: &HashMap<String, Observed>,
    current: &HashMap<String, Observed>,
) -> Vec<Transition> {
    let now = Utc::now();
    let mut transitions = Vec::new();

    let mut names: Vec<&String> = current.keys().collect();
    names.sort_unstable();

    for name in names {
        let next = &current[name];
        let Some(prev) = previous.get(name) else {
            continue; // first sighting is a baseline, not a transition
        };

        if prev.status != next.status {
            let severity = match next.status {
                ServiceStatus::Failed => Severity::Critical,
                // Running → stopped without an operator stop looks like a
                // crash; the registry passes through `stopping` otherwise.
                ServiceStatus::Stopped if prev.status == ServiceStatus::Running => {
                    Severity::Critical
                }
                _ => Severity::Info,
            };
            transitions.push(Transition {
                service: name.clone(),
                previous: status_label(prev.status).to_string(),
                next: status_label(next.status).to_string(),
                severity,
                timestamp: now,
                description: format!(
                    "{name}: {} -> {}",
                    status_label(prev.status),
                    status_label(next.status)
                ),
            });
        }

        if let (Some(prev_health), Some(next_health)) = (prev.health, next.health) {
            if prev_health != next_health {
                let severity = match next_health {
                    HealthStatus::Unhealthy => Severity::Critical,
                    HealthStatus::Degraded => Severity::Warn,
                    _ => Severity::Info,
                };
                transitions.push(Transition {
                    service: name.clone(),
                    previous: health_label(prev_health).to_string(),
                    next: health_label(next_health).to_string(),
                    severity,
                    timestamp: now,
                    description: format!(
                        "{name}: health {} -> {}",
                        health_label(prev_health),
                        health_label(next_health)
                    ),
                });
            }
        }
    }

    transitions
}
