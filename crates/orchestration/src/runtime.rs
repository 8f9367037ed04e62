//! Runtime detection
//!
//! Derives, for each declared service, how to launch it and how to check
//! its health: container services short-circuit on their image, native
//! services go through a language/framework table that also sniffs the
//! project directory (package manager lockfiles, entry point files).

use crate::config::{HealthCheckConfig, HealthCheckKind, Service};
use crate::{Error, Result};
use appdash_registry::ServiceKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How to launch a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchPlan {
    /// Spawn a native process
    Native {
        /// Program to execute
        command: String,
        /// Arguments
        args: Vec<String>,
    },
    /// Run a container
    Container {
        /// Image reference
        image_ref: String,
    },
}

/// The derived plan for launching and health-checking one service
#[derive(Debug, Clone)]
pub struct Runtime {
    /// Launch plan
    pub plan: LaunchPlan,
    /// Working directory for native launches
    pub workdir: PathBuf,
    /// Composed environment (project < service < orchestrator-injected)
    pub env: HashMap<String, String>,
    /// Primary port, 0 when the service declares none
    pub effective_port: u16,
    /// Resolved health check (http downgraded to process when portless)
    pub health_spec: HealthCheckConfig,
}

impl Runtime {
    /// Native or container
    pub fn kind(&self) -> ServiceKind {
        match self.plan {
            LaunchPlan::Native { .. } => ServiceKind::Native,
            LaunchPlan::Container { .. } => ServiceKind::Container,
        }
    }

    /// Whether the service declared any port
    pub fn needs_port(&self) -> bool {
        self.effective_port > 0
    }
}

/// Derive the runtime for one service, or fail with [`Error::Unsupported`]
pub fn detect_runtime(
    service: &Service,
    project_env: &HashMap<String, String>,
) -> Result<Runtime> {
    let effective_port = service.primary_port();

    let plan = match (&service.image, &service.command) {
        (Some(image), _) if !image.is_empty() => LaunchPlan::Container {
            image_ref: image.clone(),
        },
        (_, Some(command)) if !command.is_empty() => LaunchPlan::Native {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), command.clone()],
        },
        _ => native_plan(service, effective_port)?,
    };

    let health_spec = resolve_health_spec(service, effective_port);
    let env = compose_env(service, project_env, effective_port);

    debug!(
        service = %service.name,
        ?plan,
        effective_port,
        check = ?health_spec.kind,
        "runtime detected"
    );

    Ok(Runtime {
        plan,
        workdir: service.project_path.clone(),
        env,
        effective_port,
        health_spec,
    })
}

fn native_plan(service: &Service, port: u16) -> Result<LaunchPlan> {
    let language = service.language.to_lowercase();
    let framework = service
        .framework
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    let dir = &service.project_path;

    let (command, args) = match language.as_str() {
        "node" | "nodejs" | "javascript" | "typescript" => node_command(dir),
        "python" => python_command(&framework, dir, port).ok_or_else(|| Error::Unsupported {
            service: service.name.clone(),
            reason: "no recognizable python entry point (framework, main.py or app.py)"
                .to_string(),
        })?,
        "go" | "golang" => ("go".to_string(), vec!["run".to_string(), ".".to_string()]),
        "rust" => ("cargo".to_string(), vec!["run".to_string()]),
        "dotnet" | "csharp" | "c#" => ("dotnet".to_string(), vec!["run".to_string()]),
        "java" | "kotlin" => java_command(&framework, dir).ok_or_else(|| Error::Unsupported {
            service: service.name.clone(),
            reason: "no maven or gradle build file found".to_string(),
        })?,
        other => {
            return Err(Error::Unsupported {
                service: service.name.clone(),
                reason: if other.is_empty() {
                    "service declares neither an image nor a language".to_string()
                } else {
                    format!("unrecognized language '{other}'")
                },
            })
        }
    };

    Ok(LaunchPlan::Native { command, args })
}

/// Node: pick the package manager, then `run dev` when a dev script exists
fn node_command(dir: &Path) -> (String, Vec<String>) {
    let package_json: Option<serde_json::Value> = std::fs::read_to_string(dir.join("package.json"))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok());

    let pm = package_json
        .as_ref()
        .and_then(|pkg| pkg.get("packageManager"))
        .and_then(|pm| pm.as_str())
        .map(|pm| pm.split('@').next().unwrap_or(pm).to_string())
        .unwrap_or_else(|| {
            if dir.join("pnpm-lock.yaml").exists() {
                "pnpm".to_string()
            } else if dir.join("yarn.lock").exists() {
                "yarn".to_string()
            } else {
                // package-lock.json or nothing at all: npm either way
                "npm".to_string()
            }
        });

    let has_dev_script = package_json
        .as_ref()
        .and_then(|pkg| pkg.get("scripts"))
        .and_then(|scripts| scripts.get("dev"))
        .is_some();

    let args = if has_dev_script {
        vec!["run".to_string(), "dev".to_string()]
    } else {
        vec!["start".to_string()]
    };
    (pm, args)
}

fn python_command(framework: &str, dir: &Path, port: u16) -> Option<(String, Vec<String>)> {
    match framework {
        "flask" => {
            let mut args = vec!["-m".to_string(), "flask".to_string(), "run".to_string()];
            if port > 0 {
                args.push("--port".to_string());
                args.push(port.to_string());
            }
            Some(("python".to_string(), args))
        }
        "django" => {
            let mut args = vec!["manage.py".to_string(), "runserver".to_string()];
            if port > 0 {
                args.push(port.to_string());
            }
            Some(("python".to_string(), args))
        }
        "fastapi" => {
            let mut args = vec!["main:app".to_string()];
            if port > 0 {
                args.push("--port".to_string());
                args.push(port.to_string());
            }
            Some(("uvicorn".to_string(), args))
        }
        _ => {
            for entry in ["main.py", "app.py"] {
                if dir.join(entry).exists() {
                    return Some(("python".to_string(), vec![entry.to_string()]));
                }
            }
            None
        }
    }
}

fn java_command(framework: &str, dir: &Path) -> Option<(String, Vec<String>)> {
    let gradle = if dir.join("gradlew").exists() {
        Some("./gradlew".to_string())
    } else if dir.join("build.gradle").exists() || dir.join("build.gradle.kts").exists() {
        Some("gradle".to_string())
    } else {
        None
    };
    let spring = framework.contains("spring");

    if let Some(gradle) = gradle {
        let task = if spring { "bootRun" } else { "run" };
        return Some((gradle, vec![task.to_string()]));
    }
    if dir.join("pom.xml").exists() {
        let goal = if spring {
            "spring-boot:run"
        } else {
            "exec:java"
        };
        return Some(("mvn".to_string(), vec![goal.to_string()]));
    }
    None
}

/// Resolve the declared health check against the declared ports.
///
/// A missing declaration derives tcp on the first port (process when
/// portless); an http check without a usable port downgrades to process.
fn resolve_health_spec(service: &Service, port: u16) -> HealthCheckConfig {
    let mut spec = service.health_check.clone().unwrap_or_else(|| {
        HealthCheckConfig::of_kind(if port > 0 {
            HealthCheckKind::Tcp
        } else {
            HealthCheckKind::Process
        })
    });

    if spec.port.is_none() && port > 0 {
        spec.port = Some(port);
    }
    if spec.kind == HealthCheckKind::Http && spec.port.unwrap_or(0) == 0 {
        spec.kind = HealthCheckKind::Process;
    }
    if spec.kind == HealthCheckKind::Tcp && spec.port.unwrap_or(0) == 0 {
        spec.kind = HealthCheckKind::Process;
    }
    spec
}

/// Later layers override earlier: project < service < injected `PORT`.
/// The spawned process inherits the orchestrator's own environment below
/// all of these.
fn compose_env(
    service: &Service,
    project_env: &HashMap<String, String>,
    port: u16,
) -> HashMap<String, String> {
    let mut env = project_env.clone();
    env.extend(service.env.clone());
    if port > 0 {
        env.insert("PORT".to_string(), port.to_string());
    }
    env
}
