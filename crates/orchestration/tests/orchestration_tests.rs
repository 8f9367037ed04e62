//! End-to-end orchestration over real native processes.
//!
//! Container behavior is covered separately behind the `docker-tests`
//! feature; everything here runs with plain `sh` services.

use appdash_launcher::{
    pid_alive, ContainerDriver, ContainerInspect, ContainerRunSpec, Error as LauncherError,
    LogEventStream,
};
use appdash_orchestration::{
    HealthCheckConfig, HealthCheckKind, Mode, Orchestrator, Project, Service, ServiceStatus,
    Settings, StartOptions, StopOptions, Error,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Stand-in driver for native-only projects; any use is a bug.
struct NoContainers;

#[async_trait]
impl ContainerDriver for NoContainers {
    async fn pull(&self, _image: &str) -> Result<(), LauncherError> {
        Err(LauncherError::container_failed("no container runtime in this test", ""))
    }
    async fn image_exists(&self, _image: &str) -> Result<bool, LauncherError> {
        Ok(false)
    }
    async fn run(&self, _spec: &ContainerRunSpec) -> Result<String, LauncherError> {
        Err(LauncherError::container_failed("no container runtime in this test", ""))
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

fn process_check() -> HealthCheckConfig {
    HealthCheckConfig {
        interval_ms: 50,
        timeout_ms: 300,
        ..HealthCheckConfig::of_kind(HealthCheckKind::Process)
    }
}

fn shell_service(name: &str, script: &str, deps: &[&str], mode: Mode) -> Service {
    Service {
        name: name.to_string(),
        language: String::new(),
        framework: None,
        command: Some(script.to_string()),
        project_path: PathBuf::from("."),
        image: None,
        ports: vec![],
        env: HashMap::new(),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        health_check: Some(process_check()),
        mode,
    }
}

fn settings() -> Settings {
    Settings {
        ready_timeout: Duration::from_secs(10),
        stop_timeout: Duration::from_secs(5),
        ..Settings::default()
    }
}

async fn orchestrator(project: Project, dir: &tempfile::TempDir) -> Orchestrator {
    Orchestrator::with_state_dir(project, settings(), Arc::new(NoContainers), dir.path())
        .await
        .expect("orchestrator opens")
}

#[test]
fn dependent_launches_only_after_dependency_is_ready() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "waves".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("upstream", "echo upstream-up; sleep 30", &[], Mode::Daemon),
                shell_service(
                    "downstream",
                    "echo downstream-up; sleep 30",
                    &["upstream"],
                    Mode::Daemon,
                ),
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        let logs = orchestrator.logs().subscribe();
        orchestrator.start(StartOptions::default()).await.unwrap();

        // The wave barrier means upstream's startup marker precedes
        // downstream's in the pipeline.
        let mut order = Vec::new();
        while order.len() < 2 {
            let entry = logs.recv().await.expect("log entry");
            if entry.message.ends_with("-up") {
                order.push(entry.message.clone());
            }
        }
        assert_eq!(order, vec!["upstream-up", "downstream-up"]);

        // Both promoted to running after their waves completed.
        for name in ["upstream", "downstream"] {
            let entry = orchestrator.registry().get(name).await.unwrap();
            assert_eq!(entry.status, ServiceStatus::Running, "{name}");
            assert!(entry.pid > 0);
        }

        orchestrator.shutdown().await.unwrap();
    });
}

#[test]
fn failed_service_blocks_dependents_and_rolls_back() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "broken".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("broken", "echo about to fail >&2; exit 1", &[], Mode::Daemon),
                shell_service("cli", "sleep 30", &["broken"], Mode::Daemon),
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        let err = orchestrator
            .start(StartOptions::default())
            .await
            .expect_err("start must fail");
        match err {
            Error::StartAborted(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].name, "broken");
                assert!(failures[0].message.contains("exited during startup"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The dependent was never launched.
        let cli = orchestrator.registry().get("cli").await.unwrap();
        assert_eq!(cli.status, ServiceStatus::NotStarted);
        assert_eq!(cli.pid, 0);

        let broken = orchestrator.registry().get("broken").await.unwrap();
        assert_eq!(broken.status, ServiceStatus::Failed);
    });
}

#[test]
fn tasks_complete_and_release_dependents() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "tasks".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("migrate", "true", &[], Mode::Task),
                shell_service("api", "sleep 30", &["migrate"], Mode::Daemon),
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        orchestrator.start(StartOptions::default()).await.unwrap();

        let migrate = orchestrator.registry().get("migrate").await.unwrap();
        assert_eq!(migrate.status, ServiceStatus::Completed);
        let api = orchestrator.registry().get("api").await.unwrap();
        assert_eq!(api.status, ServiceStatus::Running);

        orchestrator.shutdown().await.unwrap();

        // A completed task keeps its terminal status through stop-all.
        let migrate = orchestrator.registry().get("migrate").await.unwrap();
        assert_eq!(migrate.status, ServiceStatus::Completed);
    });
}

#[test]
fn failing_task_blocks_its_dependents() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "failing-task".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("migrate", "exit 3", &[], Mode::Task),
                shell_service("api", "sleep 30", &["migrate"], Mode::Daemon),
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        let err = orchestrator
            .start(StartOptions::default())
            .await
            .expect_err("task failure aborts");
        match err {
            Error::StartAborted(failures) => {
                assert_eq!(failures[0].name, "migrate");
                assert!(failures[0].message.contains("code Some(3)"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(
            orchestrator.registry().get("migrate").await.unwrap().status,
            ServiceStatus::Failed
        );
        assert_eq!(
            orchestrator.registry().get("api").await.unwrap().status,
            ServiceStatus::NotStarted
        );
    });
}

#[test]
fn stop_all_leaves_no_orphans() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "stop-all".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("a", "sleep 60", &[], Mode::Daemon),
                shell_service("b", "sleep 60", &[], Mode::Daemon),
                shell_service("c", "sleep 60", &[], Mode::Daemon),
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        orchestrator.start(StartOptions::default()).await.unwrap();
        let pids: Vec<u32> = {
            let mut pids = Vec::new();
            for name in ["a", "b", "c"] {
                pids.push(orchestrator.registry().get(name).await.unwrap().pid);
            }
            pids
        };
        for pid in &pids {
            assert!(pid_alive(*pid));
        }

        orchestrator.stop(None, StopOptions::default()).await.unwrap();

        for (name, pid) in ["a", "b", "c"].iter().zip(&pids) {
            assert!(!pid_alive(*pid), "{name} left an orphan");
            let entry = orchestrator.registry().get(name).await.unwrap();
            assert_eq!(entry.status, ServiceStatus::Stopped, "{name}");
        }
    });
}

#[test]
fn restart_replaces_only_the_named_service() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "restart".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("db", "sleep 60", &[], Mode::Daemon),
                shell_service("api", "sleep 60", &["db"], Mode::Daemon),
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        orchestrator.start(StartOptions::default()).await.unwrap();
        let db_pid = orchestrator.registry().get("db").await.unwrap().pid;
        let api_pid = orchestrator.registry().get("api").await.unwrap().pid;

        orchestrator.restart("api").await.unwrap();

        let db_after = orchestrator.registry().get("db").await.unwrap();
        let api_after = orchestrator.registry().get("api").await.unwrap();
        assert_eq!(db_after.pid, db_pid, "dependency must be untouched");
        assert!(pid_alive(db_pid));
        assert_ne!(api_after.pid, api_pid, "service must be a fresh process");
        assert_eq!(api_after.status, ServiceStatus::Running);
        assert_eq!(api_after.mode, Mode::Daemon);
        assert!(!pid_alive(api_pid));

        orchestrator.shutdown().await.unwrap();
    });
}

#[test]
fn reconcile_downgrades_dead_entries() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "reconcile".to_string(),
            env: HashMap::new(),
            services: vec![shell_service("svc", "sleep 60", &[], Mode::Daemon)],
        };
        let orchestrator = orchestrator(project, &dir).await;

        orchestrator.start(StartOptions::default()).await.unwrap();
        let pid = orchestrator.registry().get("svc").await.unwrap().pid;

        // Kill it behind the orchestrator's back.
        nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();
        while pid_alive(pid) {
            smol::Timer::after(Duration::from_millis(20)).await;
        }

        orchestrator.reconcile().await.unwrap();
        assert_eq!(
            orchestrator.registry().get("svc").await.unwrap().status,
            ServiceStatus::Stopped
        );
    });
}

#[test]
fn start_is_idempotent() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "idempotent".to_string(),
            env: HashMap::new(),
            services: vec![shell_service("svc", "sleep 60", &[], Mode::Daemon)],
        };
        let orchestrator = orchestrator(project, &dir).await;

        orchestrator.start(StartOptions::default()).await.unwrap();
        let first_pid = orchestrator.registry().get("svc").await.unwrap().pid;

        orchestrator.start(StartOptions::default()).await.unwrap();
        let second_pid = orchestrator.registry().get("svc").await.unwrap().pid;
        assert_eq!(first_pid, second_pid, "running service must be left alone");

        orchestrator.shutdown().await.unwrap();
    });
}

#[test]
fn unsupported_service_aborts_before_any_launch() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let project = Project {
            name: "unsupported".to_string(),
            env: HashMap::new(),
            services: vec![
                shell_service("fine", "sleep 60", &[], Mode::Daemon),
                Service {
                    command: None,
                    language: "fortran".to_string(),
                    ..shell_service("mystery", "", &[], Mode::Daemon)
                },
            ],
        };
        let orchestrator = orchestrator(project, &dir).await;

        let err = orchestrator
            .start(StartOptions::default())
            .await
            .expect_err("detection must abort the start");
        assert!(matches!(err, Error::Unsupported { .. }));

        // Nothing was launched at all.
        let fine = orchestrator.registry().get("fine").await.unwrap();
        assert_eq!(fine.status, ServiceStatus::NotStarted);
    });
}
