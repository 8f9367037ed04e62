//! Periodic health monitoring with hysteresis and subscriber fan-out
//!
//! One ticker task per service. Each tick runs the cascade, feeds the
//! candidate through hysteresis, and publishes a change event when the
//! filtered status actually moves.

use crate::config::{HealthCheckConfig, HealthCheckKind};
use crate::health::{run_cascade, HealthState, HealthStatus, LivenessProbe, ProbeOutcome};
use crate::subscription::{Publisher, Subscription, DEFAULT_DEPTH};
use appdash_registry::{Registry, ServiceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A filtered health-state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChangeEvent {
    /// The service whose status moved
    pub service: String,
    /// Status before the transition
    pub old_status: HealthStatus,
    /// Status after the transition
    pub new_status: HealthStatus,
    /// Probe detail behind the transition, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the transition was observed
    pub timestamp: DateTime<Utc>,
}

/// What one tick observed, before hysteresis
enum Observation {
    /// Health checking does not apply right now
    NotApplicable,
    /// The cascade produced a candidate
    Probe(ProbeOutcome),
}

struct MonitorEntry {
    state: HealthState,
    /// Candidate waiting out its hysteresis threshold, with its streak
    pending: Option<(HealthStatus, u32)>,
}

/// The health monitor: owns all per-service tickers and states
pub struct HealthMonitor {
    registry: Arc<Registry>,
    probe: Arc<dyn LivenessProbe>,
    entries: Arc<Mutex<HashMap<String, MonitorEntry>>>,
    publisher: Arc<Publisher<HealthChangeEvent>>,
    tickers: Mutex<HashMap<String, async_channel::Sender<()>>>,
}

impl HealthMonitor {
    /// Create a monitor over the given registry and liveness oracle
    pub fn new(registry: Arc<Registry>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            registry,
            probe,
            entries: Arc::new(Mutex::new(HashMap::new())),
            publisher: Arc::new(Publisher::new(DEFAULT_DEPTH)),
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or replace) the ticker for a service
    pub fn start(&self, service: &str, spec: HealthCheckConfig) {
        let (cancel_tx, cancel_rx) = async_channel::bounded::<()>(1);
        {
            let mut tickers = self.tickers.lock().expect("ticker lock");
            // Dropping a previous sender cancels its ticker.
            tickers.insert(service.to_string(), cancel_tx);
        }
        {
            let mut entries = self.entries.lock().expect("entries lock");
            entries.insert(
                service.to_string(),
                MonitorEntry {
                    state: HealthState::initial(spec.kind),
                    pending: None,
                },
            );
        }

        info!(service, interval_ms = spec.interval_ms, "health ticker started");
        let service = service.to_string();
        let registry = self.registry.clone();
        let probe = self.probe.clone();
        let entries = self.entries.clone();
        let publisher = self.publisher.clone();
        smol::spawn(async move {
            ticker_loop(service, spec, registry, probe, entries, publisher, cancel_rx).await;
        })
        .detach();
    }

    /// Stop the ticker for a service and forget its state
    pub fn stop(&self, service: &str) {
        debug!(service, "health ticker stopped");
        self.tickers.lock().expect("ticker lock").remove(service);
        self.entries.lock().expect("entries lock").remove(service);
    }

    /// Stop every ticker and end all subscriptions
    pub fn shutdown(&self) {
        self.tickers.lock().expect("ticker lock").clear();
        self.entries.lock().expect("entries lock").clear();
        self.publisher.close();
    }

    /// Current state of one service
    pub fn get(&self, service: &str) -> Option<HealthState> {
        self.entries
            .lock()
            .expect("entries lock")
            .get(service)
            .map(|e| e.state.clone())
    }

    /// Current state of every monitored service, sorted by name
    pub fn snapshot(&self) -> BTreeMap<String, HealthState> {
        self.entries
            .lock()
            .expect("entries lock")
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.clone()))
            .collect()
    }

    /// Subscribe to filtered state transitions
    pub fn subscribe(&self) -> Subscription<HealthChangeEvent> {
        self.publisher.subscribe()
    }
}

async fn ticker_loop(
    service: String,
    spec: HealthCheckConfig,
    registry: Arc<Registry>,
    probe: Arc<dyn LivenessProbe>,
    entries: Arc<Mutex<HashMap<String, MonitorEntry>>>,
    publisher: Arc<Publisher<HealthChangeEvent>>,
    cancel_rx: async_channel::Receiver<()>,
) {
    let started = Instant::now();
    let interval = Duration::from_millis(spec.interval_ms.max(1));

    loop {
        let observation = observe(&service, &spec, &registry, probe.as_ref()).await;

        let transition = {
            let mut map = entries.lock().expect("entries lock");
            let Some(entry) = map.get_mut(&service) else {
                // stop() ran while we were probing.
                return;
            };
            apply_observation(entry, observation, &spec, started.elapsed().as_secs())
        };

        if let Some(mut event) = transition {
            event.service = service.clone();
            info!(
                service = %event.service,
                from = ?event.old_status,
                to = ?event.new_status,
                "health transition"
            );
            publisher.publish(event);
        }

        // Sleep one interval, or wake immediately on cancellation.
        let cancelled = futures_lite::future::or(
            async {
                smol::Timer::after(interval).await;
                false
            },
            async {
                let _ = cancel_rx.recv().await;
                true
            },
        )
        .await;
        if cancelled {
            return;
        }
    }
}

async fn observe(
    service: &str,
    spec: &HealthCheckConfig,
    registry: &Registry,
    probe: &dyn LivenessProbe,
) -> Observation {
    if spec.kind == HealthCheckKind::None {
        return Observation::NotApplicable;
    }
    match registry.get(service).await {
        Ok(entry)
            if matches!(
                entry.status,
                ServiceStatus::Stopped | ServiceStatus::NotStarted
            ) =>
        {
            Observation::NotApplicable
        }
        Err(_) => Observation::NotApplicable,
        Ok(_) => Observation::Probe(run_cascade(service, spec, probe).await),
    }
}

/// Feed one observation through hysteresis; returns the transition, if any.
fn apply_observation(
    entry: &mut MonitorEntry,
    observation: Observation,
    spec: &HealthCheckConfig,
    uptime_sec: u64,
) -> Option<HealthChangeEvent> {
    let now = Utc::now();
    entry.state.checked_at = now;
    entry.state.uptime_sec = uptime_sec;

    let (candidate, outcome) = match observation {
        Observation::NotApplicable => {
            // Administrative, not a probed observation: applies at once.
            entry.pending = None;
            entry.state.consecutive_failures = 0;
            entry.state.response_time_ms = None;
            entry.state.status_code = None;
            entry.state.last_error = None;
            let old = entry.state.status;
            if old == HealthStatus::Na {
                return None;
            }
            entry.state.status = HealthStatus::Na;
            // The ticker fills in the service name before publishing.
            return Some(HealthChangeEvent {
                service: String::new(),
                old_status: old,
                new_status: HealthStatus::Na,
                reason: None,
                timestamp: now,
            });
        }
        Observation::Probe(outcome) => (outcome.status, outcome),
    };

    entry.state.response_time_ms = Some(outcome.response_time_ms);
    entry.state.status_code = outcome.status_code;
    entry.state.last_error = outcome.error.clone();
    if candidate == HealthStatus::Unhealthy {
        entry.state.consecutive_failures += 1;
    } else {
        entry.state.consecutive_failures = 0;
    }

    if candidate == entry.state.status {
        entry.pending = None;
        return None;
    }

    let streak = match entry.pending {
        Some((pending, streak)) if pending == candidate => streak + 1,
        _ => 1,
    };
    let threshold = if candidate == HealthStatus::Unhealthy {
        spec.failure_threshold
    } else {
        spec.success_threshold
    };

    if streak >= threshold.max(1) {
        let old = entry.state.status;
        entry.state.status = candidate;
        entry.pending = None;
        Some(HealthChangeEvent {
            service: String::new(),
            old_status: old,
            new_status: candidate,
            reason: outcome.error,
            timestamp: now,
        })
    } else {
        entry.pending = Some((candidate, streak));
        None
    }
}
