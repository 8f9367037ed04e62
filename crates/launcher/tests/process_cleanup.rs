//! Verifies that stopping a native service leaves no orphans behind.

use appdash_launcher::{pid_alive, LaunchSpec, NativeLauncher, StopOutcome};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn shell(script: &str) -> LaunchSpec {
    LaunchSpec {
        name: "cleanup-test".to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        workdir: PathBuf::from("."),
        env: HashMap::new(),
        port: 0,
    }
}

#[test]
fn stop_terminates_nested_children() {
    smol::block_on(async {
        let launcher = NativeLauncher::new();
        // A three-deep tree: sh -> sh -> sleep. Each level prints its pid.
        let mut launch = launcher
            .launch(&shell(
                "echo $$; sh -c 'echo $$; sleep 60' & wait",
            ))
            .await
            .expect("launch");

        let mut pids = Vec::new();
        while pids.len() < 2 {
            let event = launch.events.next().await.expect("pid line");
            if let Ok(pid) = event.line.trim().parse::<u32>() {
                pids.push(pid);
            }
        }
        for pid in &pids {
            assert!(pid_alive(*pid), "pid {pid} should be alive before stop");
        }

        let outcome = launch
            .handle
            .stop(Duration::from_secs(5))
            .await
            .expect("stop");
        assert!(matches!(
            outcome,
            StopOutcome::Graceful(_) | StopOutcome::Forced
        ));

        smol::Timer::after(Duration::from_millis(150)).await;
        for pid in &pids {
            assert!(!pid_alive(*pid), "pid {pid} survived the group stop");
        }
    });
}

#[test]
fn completed_process_reports_zero_exit() {
    smol::block_on(async {
        let launcher = NativeLauncher::new();
        let mut launch = launcher.launch(&shell("true")).await.expect("launch");
        let status = launch.handle.wait().await.expect("wait");
        assert!(status.success());
    });
}
