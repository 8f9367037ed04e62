//! Handles for native processes launched in their own process group

use crate::error::{Error, Result};
use async_process::Child;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tracing::{debug, warn};

/// Exit status of a native process
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy)]
pub enum StopOutcome {
    /// The process group exited within the deadline after SIGTERM
    Graceful(ExitStatus),
    /// The deadline passed and the group was SIGKILLed
    Forced,
}

/// A handle to a native process and the process group it leads
#[derive(Debug)]
pub struct NativeHandle {
    child: Child,
    pgid: i32,
}

impl NativeHandle {
    pub(crate) fn new(child: Child) -> Self {
        // The child was spawned with process_group(0), so its pid is the pgid.
        let pgid = child.id() as i32;
        Self { child, pgid }
    }

    /// Process ID of the group leader
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.status().await?;
        Ok(status.into())
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_status()?.map(Into::into))
    }

    /// Whether the group leader is still alive
    pub fn is_alive(&self) -> bool {
        pid_alive(self.pid())
    }

    /// Send a signal to the whole process group
    pub fn signal_group(&self, sig: Signal) -> Result<()> {
        signal::killpg(Pid::from_raw(self.pgid), sig).map_err(|e| Error::SignalFailed {
            signal: sig as i32,
            reason: e.to_string(),
        })
    }

    /// Gracefully stop the process group: SIGTERM, wait up to `timeout`,
    /// then SIGKILL the group.
    pub async fn stop(&mut self, timeout: Duration) -> Result<StopOutcome> {
        debug!(pid = self.pid(), "sending SIGTERM to process group");
        if let Err(e) = self.signal_group(Signal::SIGTERM) {
            // The group may already be gone; reap whatever is left.
            debug!(pid = self.pid(), "SIGTERM delivery failed: {e}");
        }

        let waited = futures_lite::future::or(
            async { Some(self.child.status().await) },
            async {
                smol::Timer::after(timeout).await;
                None
            },
        )
        .await;

        match waited {
            Some(status) => Ok(StopOutcome::Graceful(status?.into())),
            None => {
                warn!(
                    pid = self.pid(),
                    "process group ignored SIGTERM for {timeout:?}, sending SIGKILL"
                );
                if let Err(e) = self.signal_group(Signal::SIGKILL) {
                    debug!(pid = self.pid(), "SIGKILL delivery failed: {e}");
                }
                let _ = self.child.status().await?;
                Ok(StopOutcome::Forced)
            }
        }
    }
}

/// Test whether a PID refers to a live process (signal 0 probe)
pub fn pid_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{LaunchSpec, NativeLauncher};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn sh(name: &str, script: &str) -> LaunchSpec {
        LaunchSpec {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            workdir: PathBuf::from("."),
            env: HashMap::new(),
            port: 0,
        }
    }

    #[smol_potat::test]
    async fn wait_reports_exit_code() {
        let launcher = NativeLauncher::new();
        let mut launch = launcher.launch(&sh("exit-7", "exit 7")).await.unwrap();
        let status = launch.handle.wait().await.unwrap();
        assert_eq!(status.code, Some(7));
        assert!(!status.success());
    }

    #[smol_potat::test]
    async fn stop_is_graceful_for_cooperative_process() {
        let launcher = NativeLauncher::new();
        let mut launch = launcher.launch(&sh("sleeper", "sleep 30")).await.unwrap();
        assert!(launch.handle.is_alive());

        let outcome = launch
            .handle
            .stop(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, StopOutcome::Graceful(_)));
        assert!(!pid_alive(launch.handle.pid()));
    }

    #[smol_potat::test]
    async fn stop_escalates_to_sigkill() {
        let launcher = NativeLauncher::new();
        // Trap and ignore SIGTERM so only SIGKILL can end it.
        let mut launch = launcher
            .launch(&sh("stubborn", "trap '' TERM; while :; do sleep 1; done"))
            .await
            .unwrap();

        let outcome = launch
            .handle
            .stop(Duration::from_millis(300))
            .await
            .unwrap();
        assert!(matches!(outcome, StopOutcome::Forced));
        assert!(!pid_alive(launch.handle.pid()));
    }

    #[smol_potat::test]
    async fn stop_kills_the_whole_group() {
        let launcher = NativeLauncher::new();
        // The shell spawns a grandchild; killing only the leader would orphan it.
        let mut launch = launcher
            .launch(&sh("tree", "sleep 60 & echo $!; wait"))
            .await
            .unwrap();

        use futures::StreamExt;
        let grandchild: u32 = launch
            .events
            .next()
            .await
            .expect("grandchild pid line")
            .line
            .trim()
            .parse()
            .unwrap();
        assert!(pid_alive(grandchild));

        launch.handle.stop(Duration::from_secs(5)).await.unwrap();
        // SIGTERM went to the group, so the grandchild is gone too.
        smol::Timer::after(Duration::from_millis(100)).await;
        assert!(!pid_alive(grandchild));
    }
}
