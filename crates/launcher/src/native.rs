//! Native process launcher
//!
//! Spawns a service as a process-group leader and splits its stdout and
//! stderr into a single tagged [`LogEvent`] stream.

use crate::error::{Error, Result};
use crate::event::{LogEvent, LogEventStream, LogSource};
use crate::process::NativeHandle;
use async_process::Stdio;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures_lite::io::{AsyncBufReadExt, BufReader};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the advisory port probe waits for a connection
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Everything needed to spawn one native service
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Service name, used for tracing only
    pub name: String,
    /// Program to execute
    pub command: String,
    /// Arguments to pass to the program
    pub args: Vec<String>,
    /// Working directory
    pub workdir: PathBuf,
    /// Environment variables (fully composed by the caller)
    pub env: HashMap<String, String>,
    /// The service's primary port, 0 when it has none
    pub port: u16,
}

/// A successfully launched native service
pub struct NativeLaunch {
    /// Handle to the process group
    pub handle: NativeHandle,
    /// Merged stdout/stderr line stream
    pub events: LogEventStream,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for NativeLaunch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLaunch")
            .field("handle", &self.handle)
            .field("events", &"<LogEventStream>")
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Launcher for native process services
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLauncher;

impl NativeLauncher {
    /// Create a new native launcher
    pub fn new() -> Self {
        Self
    }

    /// Spawn the process described by `spec` in a fresh process group.
    ///
    /// The port pre-check is advisory: a busy port is reported in the
    /// spawn diagnostics but never aborts the launch.
    pub async fn launch(&self, spec: &LaunchSpec) -> Result<NativeLaunch> {
        let diagnostic = if spec.port > 0 {
            self.probe_port(spec).await
        } else {
            None
        };

        info!(
            service = %spec.name,
            command = %spec.command,
            args = ?spec.args,
            "starting native service"
        );

        let mut cmd = std::process::Command::new(&spec.command);
        cmd.args(&spec.args).current_dir(&spec.workdir);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut cmd = async_process::Command::from(cmd);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::spawn_failed(&spec.command, e.to_string(), diagnostic.clone())
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let events = merge_output(stdout, stderr);

        let handle = NativeHandle::new(child);
        debug!(service = %spec.name, pid = handle.pid(), "native service spawned");

        Ok(NativeLaunch {
            handle,
            events,
            started_at: Utc::now(),
        })
    }

    /// Advisory probe: is something already listening on the declared port?
    async fn probe_port(&self, spec: &LaunchSpec) -> Option<String> {
        let addr = format!("127.0.0.1:{}", spec.port);
        let connected = futures_lite::future::or(
            async { async_net::TcpStream::connect(addr.as_str()).await.is_ok() },
            async {
                smol::Timer::after(PORT_PROBE_TIMEOUT).await;
                false
            },
        )
        .await;

        if connected {
            let note = format!("port {} is already accepting connections", spec.port);
            warn!(service = %spec.name, "{note}");
            Some(note)
        } else {
            None
        }
    }
}

/// Merge piped stdout/stderr into one tagged line stream
fn merge_output(
    stdout: Option<async_process::ChildStdout>,
    stderr: Option<async_process::ChildStderr>,
) -> LogEventStream {
    let stdout_lines = match stdout {
        Some(out) => BufReader::new(out)
            .lines()
            .filter_map(|line| async move { line.ok() })
            .map(|line| LogEvent::now(LogSource::Stdout, line))
            .boxed(),
        None => stream::empty().boxed(),
    };
    let stderr_lines = match stderr {
        Some(err) => BufReader::new(err)
            .lines()
            .filter_map(|line| async move { line.ok() })
            .map(|line| LogEvent::now(LogSource::Stderr, line))
            .boxed(),
        None => stream::empty().boxed(),
    };
    stream::select(stdout_lines, stderr_lines).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn spec(script: &str) -> LaunchSpec {
        LaunchSpec {
            name: "test".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            workdir: PathBuf::from("."),
            env: HashMap::new(),
            port: 0,
        }
    }

    #[smol_potat::test]
    async fn captures_stdout_and_stderr_with_sources() {
        let launcher = NativeLauncher::new();
        let mut launch = launcher
            .launch(&spec("echo out-line; echo err-line >&2"))
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(event) = launch.events.next().await {
            seen.push((event.source, event.line));
            if seen.len() == 2 {
                break;
            }
        }

        assert!(seen.contains(&(LogSource::Stdout, "out-line".to_string())));
        assert!(seen.contains(&(LogSource::Stderr, "err-line".to_string())));
        launch.handle.wait().await.unwrap();
    }

    #[smol_potat::test]
    async fn env_reaches_the_child() {
        let launcher = NativeLauncher::new();
        let mut s = spec("echo \"$GREETING\"");
        s.env.insert("GREETING".to_string(), "hello-from-env".to_string());
        let mut launch = launcher.launch(&s).await.unwrap();

        let first = launch.events.next().await.expect("one line");
        assert_eq!(first.line, "hello-from-env");
        launch.handle.wait().await.unwrap();
    }

    #[smol_potat::test]
    async fn spawn_failure_carries_command() {
        let launcher = NativeLauncher::new();
        let mut s = spec("unused");
        s.command = "definitely-not-a-real-binary-((".to_string();
        let err = launcher.launch(&s).await.unwrap_err();
        match err {
            Error::SpawnFailed { command, .. } => {
                assert_eq!(command, "definitely-not-a-real-binary-((")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[smol_potat::test]
    async fn busy_port_does_not_abort_launch() {
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let launcher = NativeLauncher::new();
        let mut s = spec("true");
        s.port = port;
        // Advisory only: the launch must still succeed.
        let mut launch = launcher.launch(&s).await.unwrap();
        launch.handle.wait().await.unwrap();
    }
}
