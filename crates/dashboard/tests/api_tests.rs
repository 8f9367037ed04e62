//! Control-plane contract tests over a live server and real processes.

use appdash_dashboard::DashboardServer;
use appdash_launcher::{
    ContainerDriver, ContainerInspect, ContainerRunSpec, Error as LauncherError, LogEventStream,
};
use appdash_orchestration::{
    HealthCheckConfig, HealthCheckKind, Mode, Orchestrator, Project, Service, Settings,
    StartOptions,
};
use async_trait::async_trait;
use futures::{AsyncReadExt, AsyncWriteExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct NoContainers;

#[async_trait]
impl ContainerDriver for NoContainers {
    async fn pull(&self, _image: &str) -> Result<(), LauncherError> {
        Ok(())
    }
    async fn image_exists(&self, _image: &str) -> Result<bool, LauncherError> {
        Ok(true)
    }
    async fn run(&self, _spec: &ContainerRunSpec) -> Result<String, LauncherError> {
        Err(LauncherError::container_failed("not available in tests", ""))
    }
    async fn stop(&self, _n: &str, _t: Duration) -> Result<(), LauncherError> {
        Ok(())
    }
    async fn remove(&self, _n: &str) -> Result<(), LauncherError> {
        Ok(())
    }
    async fn inspect_by_name(&self, _n: &str) -> Result<Option<ContainerInspect>, LauncherError> {
        Ok(None)
    }
    async fn logs(&self, _id: &str) -> Result<LogEventStream, LauncherError> {
        use futures::StreamExt;
        Ok(futures::stream::empty().boxed())
    }
}

fn shell_service(name: &str, script: &str) -> Service {
    Service {
        name: name.to_string(),
        language: String::new(),
        framework: None,
        command: Some(script.to_string()),
        project_path: PathBuf::from("."),
        image: None,
        ports: vec![],
        env: HashMap::new(),
        depends_on: vec![],
        health_check: Some(HealthCheckConfig {
            interval_ms: 50,
            timeout_ms: 300,
            ..HealthCheckConfig::of_kind(HealthCheckKind::Process)
        }),
        mode: Mode::Daemon,
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    addr: SocketAddr,
    shutdown: appdash_dashboard::ShutdownHandle,
    _dir: tempfile::TempDir,
}

async fn harness(project_name: &str, services: Vec<Service>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let project = Project {
        name: project_name.to_string(),
        env: HashMap::new(),
        services,
    };
    let settings = Settings {
        ready_timeout: Duration::from_secs(10),
        stop_timeout: Duration::from_secs(5),
        ..Settings::default()
    };
    let orchestrator = Arc::new(
        Orchestrator::with_state_dir(project, settings, Arc::new(NoContainers), dir.path())
            .await
            .unwrap(),
    );

    let server = Arc::new(DashboardServer::bind(orchestrator.clone(), 0).await.unwrap());
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    smol::spawn(async move { server.run().await }).detach();

    Harness {
        orchestrator,
        addr,
        shutdown,
        _dir: dir,
    }
}

/// One-shot request; reads to EOF (the server closes REST connections)
async fn request(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
    let mut stream = async_net::TcpStream::connect(addr).await.unwrap();
    let raw = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response).to_string();
    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

/// Open an SSE stream and read until `needle` shows up (or panic)
async fn read_stream_until(addr: SocketAddr, path: &str, needle: &str, patience: Duration) -> String {
    let mut stream = async_net::TcpStream::connect(addr).await.unwrap();
    let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n");
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    let deadline = Instant::now() + patience;
    let mut collected = String::new();
    let mut chunk = [0u8; 4096];
    while Instant::now() < deadline {
        let read = futures_lite::future::or(
            async { stream.read(&mut chunk).await.ok() },
            async {
                smol::Timer::after(Duration::from_millis(200)).await;
                Some(0)
            },
        )
        .await;
        match read {
            Some(0) | None => continue,
            Some(n) => {
                collected.push_str(&String::from_utf8_lossy(&chunk[..n]));
                if collected.contains(needle) {
                    return collected;
                }
            }
        }
    }
    panic!("stream never contained {needle:?}; got:\n{collected}");
}

#[test]
fn snapshot_command_and_health_round_trip() {
    smol::block_on(async {
        let h = harness(
            "api-basics",
            vec![shell_service("svc", "sleep 30")],
        )
        .await;

        // Declared but not started yet.
        let (status, body) = request(h.addr, "GET", "/api/services", "").await;
        assert_eq!(status, 200);
        let views: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(views[0]["name"], "svc");
        assert_eq!(views[0]["local"]["status"], "notStarted");

        // Operator start is accepted immediately...
        let (status, body) = request(h.addr, "POST", "/api/services/svc/start", "").await;
        assert_eq!(status, 202);
        assert!(body.contains("\"accepted\":true"));

        // ...and the service converges to running.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let (_, body) = request(h.addr, "GET", "/api/services", "").await;
            let views: serde_json::Value = serde_json::from_str(&body).unwrap();
            if views[0]["local"]["status"] == "running" {
                assert!(views[0]["local"]["pid"].as_u64().unwrap() > 0);
                break;
            }
            assert!(Instant::now() < deadline, "never reached running: {views}");
            smol::Timer::after(Duration::from_millis(100)).await;
        }

        // Health report includes it.
        let (status, body) = request(h.addr, "GET", "/api/health", "").await;
        assert_eq!(status, 200);
        let report: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["type"], "health");
        assert_eq!(report["summary"]["total"], 1);

        h.shutdown.shutdown();
        h.orchestrator.shutdown().await.unwrap();
    });
}

#[test]
fn unknown_service_commands_are_404() {
    smol::block_on(async {
        let h = harness("api-404", vec![shell_service("svc", "sleep 30")]).await;

        let (status, body) = request(h.addr, "POST", "/api/services/ghost/restart", "").await;
        assert_eq!(status, 404);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["kind"], "serviceNotFound");

        let (status, _) = request(h.addr, "GET", "/api/nope", "").await;
        assert_eq!(status, 404);

        h.shutdown.shutdown();
    });
}

#[test]
fn classification_rules_crud() {
    smol::block_on(async {
        let h = harness("api-rules", vec![shell_service("svc", "sleep 30")]).await;

        let (status, body) = request(
            h.addr,
            "POST",
            "/api/logs/classifications",
            r#"{"text":"Connection refused","level":"error"}"#,
        )
        .await;
        assert_eq!(status, 201);
        assert!(body.contains("\"index\":0"));

        let (status, body) = request(h.addr, "GET", "/api/logs/classifications", "").await;
        assert_eq!(status, 200);
        let rules: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(rules[0]["text"], "Connection refused");

        let (status, _) = request(h.addr, "DELETE", "/api/logs/classifications/0", "").await;
        assert_eq!(status, 204);
        let (_, body) = request(h.addr, "GET", "/api/logs/classifications", "").await;
        assert_eq!(body.trim(), "[]");

        let (status, _) = request(h.addr, "DELETE", "/api/logs/classifications/9", "").await;
        assert_eq!(status, 404);

        let (status, _) = request(h.addr, "POST", "/api/logs/classifications", "{oops").await;
        assert_eq!(status, 400);

        h.shutdown.shutdown();
    });
}

#[test]
fn health_stream_emits_reports_on_the_requested_cadence() {
    smol::block_on(async {
        let h = harness("api-sse", vec![shell_service("svc", "sleep 30")]).await;
        h.orchestrator.start(StartOptions::default()).await.unwrap();

        let collected = read_stream_until(
            h.addr,
            "/api/health/stream?interval=1",
            "event: health",
            Duration::from_secs(5),
        )
        .await;
        assert!(collected.contains("text/event-stream"));
        assert!(collected.contains("\"type\":\"health\""));

        h.shutdown.shutdown();
        h.orchestrator.shutdown().await.unwrap();
    });
}

#[test]
fn log_stream_carries_service_output() {
    smol::block_on(async {
        let h = harness(
            "api-logs",
            vec![shell_service(
                "chatty",
                "while :; do echo chatty-output-line; sleep 0.2; done",
            )],
        )
        .await;
        h.orchestrator.start(StartOptions::default()).await.unwrap();

        let collected = read_stream_until(
            h.addr,
            "/api/logs/stream?service=chatty",
            "chatty-output-line",
            Duration::from_secs(5),
        )
        .await;
        assert!(collected.contains("event: log"));
        assert!(collected.contains("\"service\":\"chatty\""));

        h.shutdown.shutdown();
        h.orchestrator.shutdown().await.unwrap();
    });
}

#[test]
fn ws_channel_sends_bulk_then_updates() {
    smol::block_on(async {
        let h = harness("api-ws", vec![shell_service("svc", "sleep 30")]).await;

        let stream = async_net::TcpStream::connect(h.addr).await.unwrap();
        let (mut ws, _) = async_tungstenite::client_async(
            format!("ws://{}/api/ws", h.addr),
            stream,
        )
        .await
        .expect("websocket handshake");

        use futures_util::{SinkExt, StreamExt};
        let first = ws.next().await.expect("bulk frame").unwrap();
        let bulk: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(bulk["type"], "services");
        assert_eq!(bulk["services"][0]["name"], "svc");

        // A start produces update envelopes on the channel.
        h.orchestrator.start(StartOptions::default()).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let frame = futures_lite::future::or(
                async { ws.next().await },
                async {
                    smol::Timer::after(Duration::from_secs(1)).await;
                    None
                },
            )
            .await;
            if let Some(Ok(message)) = frame {
                let value: serde_json::Value =
                    serde_json::from_str(message.to_text().unwrap()).unwrap();
                if value["type"] == "update" && value["service"]["local"]["status"] == "running" {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "no running update arrived");
        }

        ws.send(tungstenite::Message::Close(None)).await.ok();
        h.shutdown.shutdown();
        h.orchestrator.shutdown().await.unwrap();
    });
}
