//! Docker CLI implementation of the container driver

use crate::driver::{ContainerDriver, ContainerInspect, ContainerRunSpec};
use crate::error::{truncate_excerpt, Error, Result};
use crate::event::{LogEvent, LogEventStream, LogSource};
use async_process::Stdio;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures_lite::io::{AsyncBufReadExt, BufReader};
use std::time::Duration;
use tracing::{debug, info};

/// Container driver that shells out to the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Create a driver using `docker` from `PATH`
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Create a driver using a specific CLI binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn exec(&self, args: &[String]) -> Result<std::process::Output> {
        debug!(binary = %self.binary, ?args, "invoking container runtime");
        let output = async_process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output)
    }

    /// Run an invocation that must succeed, returning trimmed stdout
    async fn exec_ok(&self, args: &[String]) -> Result<String> {
        let output = self.exec(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::container_failed(
                format!("{} {} failed", self.binary, args.join(" ")),
                &stderr,
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerDriver for DockerCli {
    async fn pull(&self, image: &str) -> Result<()> {
        info!(image, "pulling image");
        self.exec_ok(&args(&["pull", image])).await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.exec(&args(&["image", "inspect", image])).await?;
        Ok(output.status.success())
    }

    async fn run(&self, spec: &ContainerRunSpec) -> Result<String> {
        let mut run_args = args(&["run", "-d", "--name", &spec.name]);
        for port in &spec.ports {
            run_args.push("-p".to_string());
            run_args.push(format!("{port}:{port}"));
        }
        for (key, value) in &spec.env {
            run_args.push("-e".to_string());
            run_args.push(format!("{key}={value}"));
        }
        for volume in &spec.volumes {
            run_args.push("-v".to_string());
            run_args.push(volume.clone());
        }
        run_args.push(spec.image.clone());

        let container_id = self.exec_ok(&run_args).await?;
        info!(name = %spec.name, id = %container_id, "container started");
        Ok(container_id)
    }

    async fn stop(&self, name_or_id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().max(1).to_string();
        let output = self
            .exec(&args(&["stop", "-t", &secs, name_or_id]))
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                return Err(Error::ContainerNotFound {
                    name: name_or_id.to_string(),
                });
            }
            return Err(Error::container_failed(
                format!("stop {name_or_id} failed"),
                &stderr,
            ));
        }
        Ok(())
    }

    async fn remove(&self, name_or_id: &str) -> Result<()> {
        let output = self.exec(&args(&["rm", "-f", name_or_id])).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                return Err(Error::ContainerNotFound {
                    name: name_or_id.to_string(),
                });
            }
            return Err(Error::container_failed(
                format!("rm {name_or_id} failed"),
                &stderr,
            ));
        }
        Ok(())
    }

    async fn inspect_by_name(&self, name: &str) -> Result<Option<ContainerInspect>> {
        // Exact-name match: docker's name filter is a regex over "/name".
        let filter = format!("name=^/{name}$");
        let output = self
            .exec(&args(&[
                "ps",
                "-a",
                "--filter",
                &filter,
                "--format",
                "{{.ID}}|{{.State}}",
                "--no-trunc",
            ]))
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::container_failed("ps failed", &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().next() else {
            return Ok(None);
        };
        let Some((id, state)) = line.split_once('|') else {
            return Ok(None);
        };
        Ok(Some(ContainerInspect {
            id: id.to_string(),
            running: state == "running",
        }))
    }

    async fn logs(&self, id: &str) -> Result<LogEventStream> {
        let mut child = async_process::Command::new(&self.binary)
            .args(["logs", "-f", "--tail", "0", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::spawn_failed(format!("{} logs", self.binary), e.to_string(), None)
            })?;

        // Containers write their application log to either pipe; both are
        // tagged as container output.
        let stdout = child
            .stdout
            .take()
            .map(|out| {
                BufReader::new(out)
                    .lines()
                    .filter_map(|line| async move { line.ok() })
                    .map(|line| LogEvent::now(LogSource::Container, line))
                    .boxed()
            })
            .unwrap_or_else(|| stream::empty().boxed());
        let stderr = child
            .stderr
            .take()
            .map(|err| {
                BufReader::new(err)
                    .lines()
                    .filter_map(|line| async move { line.ok() })
                    .map(|line| LogEvent::now(LogSource::Container, line))
                    .boxed()
            })
            .unwrap_or_else(|| stream::empty().boxed());

        // The follower process exits on its own once our reader side of the
        // pipes goes away.
        Ok(stream::select(stdout, stderr).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_include_name_ports_env() {
        // Shape-check the argv composition without a daemon.
        let spec = ContainerRunSpec {
            name: "app-db".to_string(),
            image: "postgres:16".to_string(),
            ports: vec![5432],
            env: [("POSTGRES_PASSWORD".to_string(), "dev".to_string())].into(),
            volumes: vec!["/tmp/data:/var/lib/postgresql/data".to_string()],
        };

        let mut run_args = args(&["run", "-d", "--name", &spec.name]);
        for port in &spec.ports {
            run_args.push("-p".to_string());
            run_args.push(format!("{port}:{port}"));
        }
        assert!(run_args.contains(&"app-db".to_string()));
        assert!(run_args.contains(&"5432:5432".to_string()));
    }

    #[cfg(feature = "docker-tests")]
    #[smol_potat::test]
    async fn inspect_missing_container_is_none() {
        let driver = DockerCli::new();
        let found = driver
            .inspect_by_name("app-no-such-service-xyz")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
