//! The control-plane server
//!
//! A raw accept loop over async-net: each connection is parsed as one
//! HTTP request and routed to a REST handler, an SSE writer, or the
//! WebSocket upgrade. Operator commands are accepted, handed to the
//! orchestrator in a detached task, and answered immediately.

use crate::http::{
    read_request, respond, respond_error, respond_json, sse_frame, start_sse, Request,
};
use crate::view::{all_service_views, health_report, service_view, WsEnvelope};
use crate::Result;
use appdash_orchestration::{
    ClassificationRule, Error as OrchestrationError, LogEntry, Orchestrator, ServiceEvent,
    StartOptions, StopOptions,
};
use async_net::{TcpListener, TcpStream};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tungstenite::Message;

/// Read deadline for a request head
const READ_TIMEOUT: Duration = Duration::from_secs(15);
/// Write deadline for one SSE frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Drain window on graceful shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// SSE heartbeat cadence
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Ring replay depth for a new log-stream subscriber
const LOG_REPLAY: usize = 100;

struct ServerState {
    orchestrator: Arc<Orchestrator>,
    active: AtomicUsize,
    shutdown_rx: async_channel::Receiver<()>,
}

/// Cloneable handle that triggers graceful shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: async_channel::Sender<()>,
}

impl ShutdownHandle {
    /// Begin graceful shutdown: stop accepting, drain, return from `run`
    pub fn shutdown(&self) {
        self.tx.close();
    }
}

/// The dashboard control-plane server
pub struct DashboardServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: async_channel::Sender<()>,
}

impl DashboardServer {
    /// Bind the control plane on localhost
    pub async fn bind(orchestrator: Arc<Orchestrator>, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!(addr = %listener.local_addr()?, "dashboard control plane listening");
        let (shutdown_tx, shutdown_rx) = async_channel::unbounded::<()>();
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                orchestrator,
                active: AtomicUsize::new(0),
                shutdown_rx,
            }),
            shutdown_tx,
        })
    }

    /// The bound address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that ends [`DashboardServer::run`] gracefully
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shutdown, then drain for up to 10 s
    pub async fn run(&self) -> Result<()> {
        loop {
            enum Turn {
                Conn(io::Result<(TcpStream, SocketAddr)>),
                Quit,
            }
            let turn = futures_lite::future::or(
                async { Turn::Conn(self.listener.accept().await) },
                async {
                    let _ = self.state.shutdown_rx.recv().await;
                    Turn::Quit
                },
            )
            .await;

            match turn {
                Turn::Conn(Ok((stream, addr))) => {
                    debug!(%addr, "connection accepted");
                    let state = self.state.clone();
                    state.active.fetch_add(1, Ordering::SeqCst);
                    smol::spawn(async move {
                        if let Err(e) = handle_connection(&state, stream).await {
                            debug!("connection ended: {e}");
                        }
                        state.active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .detach();
                }
                Turn::Conn(Err(e)) => {
                    warn!("accept failed: {e}");
                }
                Turn::Quit => break,
            }
        }

        // Drain: streaming handlers observe the same shutdown channel.
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.state.active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            smol::Timer::after(Duration::from_millis(100)).await;
        }
        let leftover = self.state.active.load(Ordering::SeqCst);
        if leftover > 0 {
            warn!(leftover, "drain window elapsed with connections still open");
        }
        info!("dashboard control plane stopped");
        Ok(())
    }
}

async fn handle_connection(state: &Arc<ServerState>, mut stream: TcpStream) -> Result<()> {
    let Some(request) = read_request(&mut stream, READ_TIMEOUT).await? else {
        return Ok(());
    };
    debug!(method = %request.method, path = %request.path, "request");

    let segments = request.segments();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["api", "services"]) => {
            let views = all_service_views(&state.orchestrator).await;
            respond_json(&mut stream, 200, &serde_json::to_value(views)?).await?;
            Ok(())
        }
        ("GET", ["api", "health"]) => {
            let report = health_report(&state.orchestrator, None);
            respond_json(&mut stream, 200, &serde_json::to_value(report)?).await?;
            Ok(())
        }
        ("GET", ["api", "health", "stream"]) => stream_health(state, stream, &request).await,
        ("GET", ["api", "ws"]) if request.is_websocket_upgrade() => {
            handle_ws(state, stream, &request).await
        }
        ("POST", ["api", "services", action @ ("start" | "stop" | "restart")]) => {
            accept_command(state, &mut stream, None, action).await
        }
        ("POST", ["api", "services", name, action @ ("start" | "stop" | "restart")]) => {
            let name = name.to_string();
            accept_command(state, &mut stream, Some(name), action).await
        }
        ("GET", ["api", "logs", "classifications"]) => {
            let rules = state.orchestrator.logs().rules();
            respond_json(&mut stream, 200, &serde_json::to_value(rules)?).await?;
            Ok(())
        }
        ("POST", ["api", "logs", "classifications"]) => {
            match serde_json::from_slice::<ClassificationRule>(&request.body) {
                Ok(rule) => {
                    state.orchestrator.logs().add_rule(rule);
                    let index = state.orchestrator.logs().rules().len() - 1;
                    respond_json(&mut stream, 201, &serde_json::json!({ "index": index })).await?;
                }
                Err(e) => {
                    respond_error(&mut stream, 400, &format!("invalid rule: {e}"), "project")
                        .await?;
                }
            }
            Ok(())
        }
        ("DELETE", ["api", "logs", "classifications", index]) => {
            match index.parse::<usize>() {
                Ok(index) if state.orchestrator.logs().remove_rule(index) => {
                    respond(&mut stream, 204, "application/json", b"").await?;
                }
                Ok(_) => respond_error(&mut stream, 404, "no such rule", "project").await?,
                Err(_) => {
                    respond_error(&mut stream, 400, "index must be an integer", "project").await?;
                }
            }
            Ok(())
        }
        ("GET", ["api", "logs", "stream"]) => stream_logs(state, stream, &request).await,
        (_, ["api", ..]) => {
            respond_error(&mut stream, 404, "no such endpoint", "project").await?;
            Ok(())
        }
        _ => {
            respond_error(&mut stream, 404, "not found", "project").await?;
            Ok(())
        }
    }
}

/// Enqueue an operator command; respond once accepted, not completed
async fn accept_command(
    state: &Arc<ServerState>,
    stream: &mut TcpStream,
    name: Option<String>,
    action: &str,
) -> Result<()> {
    if let Some(name) = &name {
        if state.orchestrator.project().service(name).is_none() {
            let err = OrchestrationError::ServiceNotFound(name.clone());
            respond_error(stream, 404, &err.to_string(), err.kind()).await?;
            return Ok(());
        }
    }

    let orchestrator = state.orchestrator.clone();
    let action_owned = action.to_string();
    let target = name.clone();
    smol::spawn(async move {
        let result = match (action_owned.as_str(), target.as_deref()) {
            ("start", Some(service)) => orchestrator.start_one(service).await,
            ("start", None) => orchestrator.start(StartOptions::default()).await,
            ("stop", Some(service)) => {
                orchestrator.stop(Some(service), StopOptions::default()).await
            }
            ("stop", None) => orchestrator.stop(None, StopOptions::default()).await,
            ("restart", Some(service)) => orchestrator.restart(service).await,
            ("restart", None) => {
                match orchestrator.stop(None, StopOptions::default()).await {
                    Ok(()) => {
                        orchestrator
                            .start(StartOptions {
                                restart_containers: true,
                            })
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(action = %action_owned, service = ?target, "operator command failed: {e}");
        }
    })
    .detach();

    respond_json(
        stream,
        202,
        &serde_json::json!({
            "accepted": true,
            "action": action,
            "service": name,
        }),
    )
    .await?;
    Ok(())
}

fn service_filter(request: &Request) -> Option<Vec<String>> {
    request.query.get("service").map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

/// SSE: `health` on a cadence, `health-change` as they happen,
/// `heartbeat` every 30 s regardless
async fn stream_health(
    state: &Arc<ServerState>,
    mut stream: TcpStream,
    request: &Request,
) -> Result<()> {
    let interval = request
        .query
        .get("interval")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5)
        .clamp(1, 60);
    let interval = Duration::from_secs(interval);
    let filter = service_filter(request);

    start_sse(&mut stream).await?;
    let report = health_report(&state.orchestrator, filter.as_deref());
    sse_frame(
        &mut stream,
        "health",
        &serde_json::to_value(report)?,
        WRITE_TIMEOUT,
    )
    .await?;

    let changes = state.orchestrator.health().subscribe();
    let mut next_report = Instant::now() + interval;
    let mut next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;

    loop {
        enum Turn {
            Change(Option<appdash_orchestration::HealthChangeEvent>),
            Report,
            Heartbeat,
            Quit,
        }
        let turn = futures_lite::future::or(
            async { Turn::Change(changes.recv().await) },
            futures_lite::future::or(
                futures_lite::future::or(
                    async {
                        smol::Timer::at(next_report).await;
                        Turn::Report
                    },
                    async {
                        smol::Timer::at(next_heartbeat).await;
                        Turn::Heartbeat
                    },
                ),
                async {
                    let _ = state.shutdown_rx.recv().await;
                    Turn::Quit
                },
            ),
        )
        .await;

        match turn {
            Turn::Change(Some(change)) => {
                if let Some(filter) = &filter {
                    if !filter.contains(&change.service) {
                        continue;
                    }
                }
                sse_frame(
                    &mut stream,
                    "health-change",
                    &serde_json::to_value(&change)?,
                    WRITE_TIMEOUT,
                )
                .await?;
            }
            Turn::Change(None) => break,
            Turn::Report => {
                let report = health_report(&state.orchestrator, filter.as_deref());
                sse_frame(
                    &mut stream,
                    "health",
                    &serde_json::to_value(report)?,
                    WRITE_TIMEOUT,
                )
                .await?;
                next_report = Instant::now() + interval;
            }
            Turn::Heartbeat => {
                sse_frame(
                    &mut stream,
                    "heartbeat",
                    &serde_json::json!({ "timestamp": chrono::Utc::now() }),
                    WRITE_TIMEOUT,
                )
                .await?;
                next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;
            }
            Turn::Quit => break,
        }
    }
    Ok(())
}

/// SSE stream of log entries: ring replay first, then live
async fn stream_logs(
    state: &Arc<ServerState>,
    mut stream: TcpStream,
    request: &Request,
) -> Result<()> {
    let filter = service_filter(request);
    let matches = |entry: &LogEntry| match &filter {
        Some(names) => names.contains(&entry.service),
        None => true,
    };

    // Subscribe before replay so nothing falls in the gap; duplicates
    // are possible, losses are not.
    let live = state.orchestrator.logs().subscribe();
    start_sse(&mut stream).await?;

    let mut backlog: Vec<LogEntry> = Vec::new();
    for entry in state.orchestrator.registry().list_all().await {
        for log in state.orchestrator.logs().tail(&entry.name, LOG_REPLAY) {
            if matches(&log) {
                backlog.push(log);
            }
        }
    }
    backlog.sort_by_key(|entry| entry.timestamp);
    for entry in backlog {
        sse_frame(
            &mut stream,
            "log",
            &serde_json::to_value(&entry)?,
            WRITE_TIMEOUT,
        )
        .await?;
    }

    loop {
        enum Turn {
            Entry(Option<LogEntry>),
            Quit,
        }
        let turn = futures_lite::future::or(
            async { Turn::Entry(live.recv().await) },
            async {
                let _ = state.shutdown_rx.recv().await;
                Turn::Quit
            },
        )
        .await;

        match turn {
            Turn::Entry(Some(entry)) if matches(&entry) => {
                sse_frame(
                    &mut stream,
                    "log",
                    &serde_json::to_value(&entry)?,
                    WRITE_TIMEOUT,
                )
                .await?;
            }
            Turn::Entry(Some(_)) => {}
            Turn::Entry(None) | Turn::Quit => break,
        }
    }
    Ok(())
}

/// The bidirectional service channel: bulk `services` on connect, then
/// add/update/remove envelopes as the orchestrator publishes them
async fn handle_ws(
    state: &Arc<ServerState>,
    mut stream: TcpStream,
    request: &Request,
) -> Result<()> {
    use futures::AsyncWriteExt;

    let Some(key) = request.header("sec-websocket-key") else {
        respond_error(&mut stream, 400, "missing Sec-WebSocket-Key", "project").await?;
        return Ok(());
    };
    let accept = tungstenite::handshake::derive_accept_key(key.as_bytes());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    let ws = async_tungstenite::WebSocketStream::from_raw_socket(
        stream,
        tungstenite::protocol::Role::Server,
        None,
    )
    .await;
    let (mut sink, mut source) = ws.split();

    let bulk = WsEnvelope {
        kind: "services".to_string(),
        service: None,
        services: Some(all_service_views(&state.orchestrator).await),
    };
    sink.send(Message::text(serde_json::to_string(&bulk)?))
        .await?;

    let events = state.orchestrator.events().subscribe();
    loop {
        enum Turn {
            Event(Option<ServiceEvent>),
            Incoming(Option<std::result::Result<Message, tungstenite::Error>>),
            Quit,
        }
        let turn = futures_lite::future::or(
            async { Turn::Event(events.recv().await) },
            futures_lite::future::or(
                async { Turn::Incoming(source.next().await) },
                async {
                    let _ = state.shutdown_rx.recv().await;
                    Turn::Quit
                },
            ),
        )
        .await;

        match turn {
            Turn::Event(Some(event)) => {
                let kind = match &event {
                    ServiceEvent::Add(_) => "add",
                    ServiceEvent::Update(_) => "update",
                    ServiceEvent::Remove(_) => "remove",
                };
                let envelope = WsEnvelope {
                    kind: kind.to_string(),
                    service: service_view(&state.orchestrator, event.service()).await,
                    services: None,
                };
                sink.send(Message::text(serde_json::to_string(&envelope)?))
                    .await?;
            }
            Turn::Event(None) => break,
            Turn::Incoming(Some(Ok(Message::Close(_)))) | Turn::Incoming(None) => break,
            Turn::Incoming(Some(Ok(_))) => {} // pings are answered by the protocol
            Turn::Incoming(Some(Err(e))) => {
                debug!("websocket read error: {e}");
                break;
            }
            Turn::Quit => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    Ok(())
}

