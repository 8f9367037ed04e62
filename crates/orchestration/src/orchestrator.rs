//! Wave-based service lifecycle engine
//!
//! Start brings services up level by level: everything in a wave
//! launches concurrently, and the next wave waits until every member of
//! the current one passed its readiness gate. A failure anywhere rolls
//! already-started services back in reverse order and surfaces an
//! aggregated error. Stop walks the waves backwards.

use crate::config::{HealthCheckKind, Project};
use crate::events::{ServiceEvent, ServiceEvents};
use crate::graph::DependencyGraph;
use crate::health::{HealthStatus, LivenessProbe};
use crate::health_monitor::HealthMonitor;
use crate::logs::LogPipeline;
use crate::runtime::{detect_runtime, LaunchPlan, Runtime};
use crate::settings::Settings;
use crate::{Error, Result, StartFailure};
use appdash_launcher::{
    container_name, pid_alive, ContainerDriver, ContainerLauncher, ContainerRunSpec, LaunchSpec,
    NativeHandle, NativeLauncher, StopOutcome,
};
use appdash_registry::{Mode, Registry, RegistryEntry, ServiceKind, ServiceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::lock::Mutex as AsyncMutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often readiness and orphan-stop loops poll
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Log lines included in a failure report
const EXCERPT_LINES: usize = 20;

/// Options for [`Orchestrator::start`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Replace pre-existing containers instead of adopting running ones
    pub restart_containers: bool,
}

/// Options for [`Orchestrator::stop`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Override the settings-level graceful stop deadline
    pub timeout: Option<Duration>,
}

/// Public view of one live service process
#[derive(Debug, Clone)]
pub struct ServiceProcess {
    /// Service name
    pub name: String,
    /// Native or container
    pub kind: ServiceKind,
    /// Pid of the process-group leader (native only)
    pub pid: Option<u32>,
    /// Container id (container only)
    pub container_id: Option<String>,
    /// When the service launched
    pub start_time: DateTime<Utc>,
    /// Whether the ready barrier was passed
    pub ready: bool,
    /// Why the service ended, when it has
    pub exit_reason: Option<String>,
}

enum LiveIdentity {
    Native(NativeHandle),
    Container { id: String },
}

struct ManagedService {
    runtime: Runtime,
    mode: Mode,
    identity: LiveIdentity,
    started_at: DateTime<Utc>,
    ready: bool,
    exit_reason: Option<String>,
}

impl ManagedService {
    fn view(&self, name: &str) -> ServiceProcess {
        ServiceProcess {
            name: name.to_string(),
            kind: self.runtime.kind(),
            pid: match &self.identity {
                LiveIdentity::Native(handle) => Some(handle.pid()),
                LiveIdentity::Container { .. } => None,
            },
            container_id: match &self.identity {
                LiveIdentity::Native(_) => None,
                LiveIdentity::Container { id } => Some(id.clone()),
            },
            start_time: self.started_at,
            ready: self.ready,
            exit_reason: self.exit_reason.clone(),
        }
    }
}

/// Liveness oracle backed by the registry and the container runtime
struct RegistryProbe {
    registry: Arc<Registry>,
    driver: Arc<dyn ContainerDriver>,
}

#[async_trait]
impl LivenessProbe for RegistryProbe {
    async fn is_alive(&self, service: &str) -> bool {
        let Ok(entry) = self.registry.get(service).await else {
            return false;
        };
        match entry.kind {
            ServiceKind::Native => entry.pid > 0 && pid_alive(entry.pid),
            ServiceKind::Container => self
                .driver
                .inspect_by_name(&container_name(service))
                .await
                .ok()
                .flatten()
                .map(|c| c.running)
                .unwrap_or(false),
        }
    }
}

/// The orchestrator: owns every live service of one project
pub struct Orchestrator {
    project: Project,
    settings: Settings,
    registry: Arc<Registry>,
    native: NativeLauncher,
    containers: ContainerLauncher,
    driver: Arc<dyn ContainerDriver>,
    logs: Arc<LogPipeline>,
    health: Arc<HealthMonitor>,
    events: Arc<ServiceEvents>,
    live: AsyncMutex<HashMap<String, Arc<AsyncMutex<ManagedService>>>>,
    /// Per-service lifecycle locks; exist before the service ever launches
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Serializes the compute/accept phase of bulk operations
    command_lock: AsyncMutex<()>,
}

impl Orchestrator {
    /// Open an orchestrator with the default project-scoped state directory
    pub async fn open(
        project: Project,
        settings: Settings,
        driver: Arc<dyn ContainerDriver>,
    ) -> Result<Self> {
        let state_dir = Settings::state_dir(&project.name);
        Self::with_state_dir(project, settings, driver, state_dir).await
    }

    /// Open an orchestrator with an explicit state directory
    pub async fn with_state_dir(
        project: Project,
        settings: Settings,
        driver: Arc<dyn ContainerDriver>,
        state_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        project.validate()?;
        let registry = Arc::new(Registry::open(state_dir).await?);
        let probe = Arc::new(RegistryProbe {
            registry: registry.clone(),
            driver: driver.clone(),
        });

        let orchestrator = Self {
            logs: Arc::new(LogPipeline::new(settings.log_buffer)),
            health: Arc::new(HealthMonitor::new(registry.clone(), probe)),
            events: Arc::new(ServiceEvents::new()),
            native: NativeLauncher::new(),
            containers: ContainerLauncher::new(driver.clone()),
            driver,
            registry,
            settings,
            project,
            live: AsyncMutex::new(HashMap::new()),
            locks: AsyncMutex::new(HashMap::new()),
            command_lock: AsyncMutex::new(()),
        };

        // Seed declared-but-never-started services so snapshots list them.
        for service in &orchestrator.project.services {
            if orchestrator.registry.get(&service.name).await.is_err() {
                let kind = if service.image.as_deref().unwrap_or("").is_empty() {
                    ServiceKind::Native
                } else {
                    ServiceKind::Container
                };
                let entry = RegistryEntry {
                    name: service.name.clone(),
                    pid: 0,
                    container_id: String::new(),
                    port: service.primary_port(),
                    status: ServiceStatus::NotStarted,
                    mode: service.mode,
                    kind,
                    start_time: Utc::now(),
                };
                orchestrator.registry.upsert(entry).await?;
            }
        }
        orchestrator.reconcile().await?;
        Ok(orchestrator)
    }

    /// The loaded project declaration
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Effective settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The persistent registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The health monitor
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// The log pipeline
    pub fn logs(&self) -> &Arc<LogPipeline> {
        &self.logs
    }

    /// The service event hub
    pub fn events(&self) -> &Arc<ServiceEvents> {
        &self.events
    }

    /// Live process views
    pub async fn processes(&self) -> Vec<ServiceProcess> {
        let slots: Vec<(String, Arc<AsyncMutex<ManagedService>>)> = {
            let live = self.live.lock().await;
            live.iter()
                .map(|(name, slot)| (name.clone(), slot.clone()))
                .collect()
        };
        let mut views = Vec::with_capacity(slots.len());
        for (name, slot) in slots {
            views.push(slot.lock().await.view(&name));
        }
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    /// Bring the whole project up in topological waves.
    ///
    /// Idempotent: services that are already live are left untouched.
    /// On any failure, everything started by this call is stopped again
    /// in reverse order and the aggregated error lists every failure.
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        // Compute/accept phase under the command lock.
        let guard = self.command_lock.lock().await;
        let mut runtimes = HashMap::new();
        for service in &self.project.services {
            // Any undetectable runtime aborts before any launch.
            runtimes.insert(
                service.name.clone(),
                detect_runtime(service, &self.project.env)?,
            );
        }
        let graph = DependencyGraph::build(&self.project.services)?;
        let levels = graph.topological_levels()?;
        drop(guard);

        info!(project = %self.project.name, waves = levels.len(), "starting project");

        let runtimes = &runtimes;
        let mut started: Vec<String> = Vec::new();
        for level in &levels {
            let mut failures = Vec::new();

            // Launch the wave concurrently, under the command lock.
            let guard = self.command_lock.lock().await;
            let launches = join_all(level.iter().map(|name| async move {
                (name, self.launch_service(name, &runtimes[name], options).await)
            }))
            .await;
            drop(guard);

            let mut launched = Vec::new();
            for (name, result) in launches {
                match result {
                    Ok(()) => {
                        started.push(name.clone());
                        launched.push(name.clone());
                    }
                    Err(e) => failures.push(self.failure(name, &e)),
                }
            }

            // Readiness barrier, without the command lock.
            if failures.is_empty() {
                let waits = join_all(launched.iter().map(|name| async move {
                    (name, self.wait_ready(name, &runtimes[name]).await)
                }))
                .await;
                for (name, result) in waits {
                    if let Err(e) = result {
                        failures.push(self.failure(name, &e));
                    }
                }
            }

            if !failures.is_empty() {
                warn!(
                    wave = ?level,
                    failed = failures.len(),
                    "wave failed, rolling back started services"
                );
                self.rollback(&started).await;
                return Err(Error::StartAborted(failures));
            }

            // The wave is ready: promote its long-running members.
            for name in level {
                self.promote(name).await;
            }
        }

        info!(project = %self.project.name, "project is up");
        Ok(())
    }

    /// Stop one service, or the whole project in reverse topological order
    pub async fn stop(&self, target: Option<&str>, options: StopOptions) -> Result<()> {
        match target {
            Some(name) => {
                if self.project.service(name).is_none() {
                    return Err(Error::ServiceNotFound(name.to_string()));
                }
                self.stop_service(name, options).await
            }
            None => {
                let guard = self.command_lock.lock().await;
                let graph = DependencyGraph::build(&self.project.services)?;
                let reverse = graph.reverse_levels()?;
                drop(guard);

                for level in reverse {
                    let results = join_all(level.iter().map(|name| async move {
                        (name, self.stop_service(name, options).await)
                    }))
                    .await;
                    for (name, result) in results {
                        if let Err(e) = result {
                            // A stuck stop was already escalated; report, continue.
                            warn!(service = %name, "stop reported: {e}");
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Start a single service, waiting for its readiness gate.
    ///
    /// Idempotent like [`Orchestrator::start`]; dependencies are not
    /// consulted, this is the operator's targeted start.
    pub async fn start_one(&self, name: &str) -> Result<()> {
        let service = self
            .project
            .service(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        let runtime = detect_runtime(service, &self.project.env)?;
        self.launch_service(name, &runtime, StartOptions::default())
            .await?;
        self.wait_ready(name, &runtime).await?;
        self.promote(name).await;
        Ok(())
    }

    /// Stop then start a single service, preserving its kind and mode.
    /// Dependencies are left untouched.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let service = self
            .project
            .service(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        info!(service = name, "restarting");

        self.stop_service(name, StopOptions::default()).await?;

        let runtime = detect_runtime(service, &self.project.env)?;
        let options = StartOptions {
            restart_containers: true,
        };
        self.launch_service(name, &runtime, options).await?;
        self.wait_ready(name, &runtime).await?;
        self.promote(name).await;
        Ok(())
    }

    /// Align the registry with observed process/container state
    pub async fn reconcile(&self) -> Result<()> {
        for entry in self.registry.list_all().await {
            if !entry.status.is_active() {
                continue;
            }
            let alive = match entry.kind {
                ServiceKind::Native => entry.pid > 0 && pid_alive(entry.pid),
                ServiceKind::Container => self
                    .driver
                    .inspect_by_name(&container_name(&entry.name))
                    .await
                    .ok()
                    .flatten()
                    .map(|c| c.running)
                    .unwrap_or(false),
            };
            if !alive {
                info!(service = %entry.name, "reconcile: not running, marking stopped");
                self.registry
                    .update_status(&entry.name, ServiceStatus::Stopped)
                    .await?;
                self.events.publish(ServiceEvent::Update(entry.name));
            }
        }
        Ok(())
    }

    /// Stop everything and end all streams; used at teardown
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.stop(None, StopOptions::default()).await;
        self.health.shutdown();
        self.logs.shutdown();
        self.events.close();
        result
    }

    async fn service_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn launch_service(
        &self,
        name: &str,
        runtime: &Runtime,
        options: StartOptions,
    ) -> Result<()> {
        let lock = self.service_lock(name).await;
        let _guard = lock.lock().await;

        // Idempotency: a live, breathing service is left alone.
        if let Some(slot) = self.live.lock().await.get(name).cloned() {
            let alive = match &slot.lock().await.identity {
                LiveIdentity::Native(handle) => handle.is_alive(),
                LiveIdentity::Container { .. } => true,
            };
            if alive {
                debug!(service = name, "already running, skipping launch");
                return Ok(());
            }
            self.live.lock().await.remove(name);
        }

        let service = self
            .project
            .service(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        let was_known = self.registry.get(name).await.is_ok();

        let managed = match &runtime.plan {
            LaunchPlan::Native { command, args } => {
                let spec = LaunchSpec {
                    name: name.to_string(),
                    command: command.clone(),
                    args: args.clone(),
                    workdir: runtime.workdir.clone(),
                    env: runtime.env.clone(),
                    port: runtime.effective_port,
                };
                let launch = self.native.launch(&spec).await.map_err(|e| Error::Launch {
                    service: name.to_string(),
                    message: e.to_string(),
                })?;

                let entry = RegistryEntry {
                    name: name.to_string(),
                    pid: launch.handle.pid(),
                    container_id: String::new(),
                    port: runtime.effective_port,
                    status: ServiceStatus::Starting,
                    mode: service.mode,
                    kind: ServiceKind::Native,
                    start_time: launch.started_at,
                };
                self.registry.upsert(entry).await?;
                self.logs.attach(name, launch.events);

                ManagedService {
                    runtime: runtime.clone(),
                    mode: service.mode,
                    identity: LiveIdentity::Native(launch.handle),
                    started_at: launch.started_at,
                    ready: false,
                    exit_reason: None,
                }
            }
            LaunchPlan::Container { image_ref } => {
                let spec = ContainerRunSpec {
                    name: container_name(name),
                    image: image_ref.clone(),
                    ports: service.ports.clone(),
                    env: runtime.env.clone(),
                    volumes: vec![],
                };
                let launch = self
                    .containers
                    .launch(&spec, options.restart_containers, self.settings.stop_timeout)
                    .await
                    .map_err(|e| Error::Launch {
                        service: name.to_string(),
                        message: e.to_string(),
                    })?;

                let entry = RegistryEntry {
                    name: name.to_string(),
                    pid: 0,
                    container_id: launch.container_id.clone(),
                    port: runtime.effective_port,
                    status: ServiceStatus::Starting,
                    mode: service.mode,
                    kind: ServiceKind::Container,
                    start_time: launch.started_at,
                };
                self.registry.upsert(entry).await?;
                self.logs.attach(name, launch.events);

                ManagedService {
                    runtime: runtime.clone(),
                    mode: service.mode,
                    identity: LiveIdentity::Container {
                        id: launch.container_id,
                    },
                    started_at: launch.started_at,
                    ready: false,
                    exit_reason: None,
                }
            }
        };

        self.live
            .lock()
            .await
            .insert(name.to_string(), Arc::new(AsyncMutex::new(managed)));

        // Tasks and builds are watched through their exit status instead.
        if matches!(service.mode, Mode::Daemon | Mode::Watch) {
            self.health.start(name, runtime.health_spec.clone());
        }

        self.events.publish(if was_known {
            ServiceEvent::Update(name.to_string())
        } else {
            ServiceEvent::Add(name.to_string())
        });
        Ok(())
    }

    /// Block until the service passes its readiness gate or times out
    async fn wait_ready(&self, name: &str, runtime: &Runtime) -> Result<()> {
        let lock = self.service_lock(name).await;
        let _guard = lock.lock().await;

        let slot = self
            .live
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        let mode = slot.lock().await.mode;
        let deadline = self.settings.ready_timeout;

        let result = match mode {
            Mode::Task | Mode::Build => self.wait_task_exit(name, &slot, deadline).await,
            Mode::Daemon | Mode::Watch => {
                if runtime.health_spec.kind == HealthCheckKind::None {
                    Ok(())
                } else {
                    self.wait_first_health(name, &slot, deadline).await
                }
            }
        };

        match result {
            Ok(()) => {
                slot.lock().await.ready = true;
                Ok(())
            }
            Err(e) => {
                self.registry
                    .update_status(name, ServiceStatus::Failed)
                    .await
                    .ok();
                self.events.publish(ServiceEvent::Update(name.to_string()));
                Err(e)
            }
        }
    }

    /// Ready for tasks/builds: exit 0 within the deadline
    async fn wait_task_exit(
        &self,
        name: &str,
        slot: &Arc<AsyncMutex<ManagedService>>,
        deadline: Duration,
    ) -> Result<()> {
        let mut managed = slot.lock().await;
        match &mut managed.identity {
            LiveIdentity::Native(handle) => {
                let waited = futures_lite::future::or(
                    async { Some(handle.wait().await) },
                    async {
                        smol::Timer::after(deadline).await;
                        None
                    },
                )
                .await;
                match waited {
                    Some(Ok(status)) if status.success() => {
                        managed.exit_reason = Some("completed".to_string());
                        drop(managed);
                        self.registry
                            .update_status(name, ServiceStatus::Completed)
                            .await?;
                        self.events.publish(ServiceEvent::Update(name.to_string()));
                        info!(service = name, "task completed");
                        Ok(())
                    }
                    Some(Ok(status)) => Err(Error::Launch {
                        service: name.to_string(),
                        message: format!("task exited with code {:?}", status.code),
                    }),
                    Some(Err(e)) => Err(Error::Launch {
                        service: name.to_string(),
                        message: e.to_string(),
                    }),
                    None => Err(Error::ReadyTimeout(name.to_string())),
                }
            }
            LiveIdentity::Container { .. } => {
                // Container tasks: done when the container stops running.
                drop(managed);
                let done = self.poll_until(deadline, || async move {
                    match self.driver.inspect_by_name(&container_name(name)).await {
                        Ok(Some(state)) => !state.running,
                        Ok(None) => true,
                        Err(_) => false,
                    }
                });
                if done.await {
                    self.registry
                        .update_status(name, ServiceStatus::Completed)
                        .await?;
                    self.events.publish(ServiceEvent::Update(name.to_string()));
                    Ok(())
                } else {
                    Err(Error::ReadyTimeout(name.to_string()))
                }
            }
        }
    }

    /// Ready for daemons: the first concluded, non-unhealthy observation
    async fn wait_first_health(
        &self,
        name: &str,
        slot: &Arc<AsyncMutex<ManagedService>>,
        deadline: Duration,
    ) -> Result<()> {
        let mut waited = Duration::ZERO;
        loop {
            // One poll tick passes before the first health conclusion is
            // trusted, so a process that dies right after spawn is seen
            // as an exit, not as a momentarily-passing liveness probe.
            smol::Timer::after(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;

            // A daemon that exits during startup failed, whatever its code.
            {
                let mut managed = slot.lock().await;
                if let LiveIdentity::Native(handle) = &mut managed.identity {
                    if let Ok(Some(status)) = handle.try_wait() {
                        managed.exit_reason = Some(format!("exited ({:?})", status.code));
                        return Err(Error::Launch {
                            service: name.to_string(),
                            message: format!(
                                "service exited during startup with code {:?}",
                                status.code
                            ),
                        });
                    }
                }
            }

            if let Some(state) = self.health.get(name) {
                match state.status {
                    HealthStatus::Healthy | HealthStatus::Degraded | HealthStatus::Na => {
                        return Ok(())
                    }
                    HealthStatus::Unhealthy | HealthStatus::Unknown => {}
                }
            }

            if waited >= deadline {
                return Err(Error::ReadyTimeout(name.to_string()));
            }
        }
    }

    /// Promote a wave member to running once the wave is fully ready
    async fn promote(&self, name: &str) {
        if let Ok(entry) = self.registry.get(name).await {
            if entry.status == ServiceStatus::Starting {
                if self
                    .registry
                    .update_status(name, ServiceStatus::Running)
                    .await
                    .is_ok()
                {
                    self.events.publish(ServiceEvent::Update(name.to_string()));
                }
            }
        }
    }

    async fn stop_service(&self, name: &str, options: StopOptions) -> Result<()> {
        let lock = self.service_lock(name).await;
        let _guard = lock.lock().await;
        let timeout = options.timeout.unwrap_or(self.settings.stop_timeout);

        let slot = self.live.lock().await.remove(name);
        let entry = self.registry.get(name).await.ok();

        // Nothing live and nothing active on record: leave terminal
        // statuses (completed, failed) as they are.
        let was_active = entry
            .as_ref()
            .map(|e| e.status.is_active())
            .unwrap_or(false);
        if slot.is_none() && !was_active {
            debug!(service = name, "nothing to stop");
            return Ok(());
        }

        info!(service = name, "stopping");
        if was_active {
            self.registry
                .update_status(name, ServiceStatus::Stopping)
                .await
                .ok();
        }
        self.health.stop(name);
        self.logs.detach(name);

        let mut stuck = false;
        match slot {
            Some(slot) => {
                let mut managed = slot.lock().await;
                match &mut managed.identity {
                    LiveIdentity::Native(handle) => match handle.stop(timeout).await {
                        Ok(StopOutcome::Graceful(_)) => {}
                        Ok(StopOutcome::Forced) => {
                            managed.exit_reason = Some("forced".to_string());
                            stuck = true;
                        }
                        Err(e) => {
                            warn!(service = name, "stop failed: {e}");
                            managed.exit_reason = Some("forced".to_string());
                            stuck = true;
                        }
                    },
                    LiveIdentity::Container { .. } => {
                        self.containers.stop(name, timeout).await?;
                    }
                }
            }
            None => {
                // Known from a previous run only; stop by recorded identity.
                if let Some(entry) = &entry {
                    match entry.kind {
                        ServiceKind::Native if entry.pid > 0 => {
                            stop_orphan_group(entry.pid, timeout).await;
                        }
                        ServiceKind::Container => {
                            self.containers.stop(name, timeout).await?;
                        }
                        _ => {}
                    }
                }
            }
        }

        // Terminal statuses (failed, completed) survive a stop; only a
        // service that was actually up records the transition to stopped.
        if was_active {
            self.registry
                .update_status(name, ServiceStatus::Stopped)
                .await
                .ok();
        }
        self.events.publish(ServiceEvent::Update(name.to_string()));

        if stuck {
            Err(Error::StopStuck(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Undo a partially started launch, newest first
    async fn rollback(&self, started: &[String]) {
        for name in started.iter().rev() {
            if let Err(e) = self.stop_service(name, StopOptions::default()).await {
                warn!(service = %name, "rollback stop reported: {e}");
            }
        }
    }

    fn failure(&self, name: &str, error: &Error) -> StartFailure {
        StartFailure {
            name: name.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            log_excerpt: self.logs.excerpt(name, EXCERPT_LINES),
        }
    }

    async fn poll_until<F, Fut>(&self, deadline: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let mut waited = Duration::ZERO;
        loop {
            if condition().await {
                return true;
            }
            if waited >= deadline {
                return false;
            }
            smol::Timer::after(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;
        }
    }
}

/// Best-effort stop of a process group known only by its recorded pid
async fn stop_orphan_group(pid: u32, timeout: Duration) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if !pid_alive(pid) {
        return;
    }
    let pgid = Pid::from_raw(pid as i32);
    let _ = killpg(pgid, Signal::SIGTERM);

    let mut waited = Duration::ZERO;
    while pid_alive(pid) && waited < timeout {
        smol::Timer::after(POLL_INTERVAL).await;
        waited += POLL_INTERVAL;
    }
    if pid_alive(pid) {
        warn!(pid, "orphan process group ignored SIGTERM, sending SIGKILL");
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}
