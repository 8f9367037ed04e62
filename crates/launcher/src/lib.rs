//! # appdash-launcher
//!
//! Process and container launchers for appdash services.
//!
//! A service runs either as a native process (spawned in its own process
//! group so the whole tree can be signalled) or as a container managed
//! through a [`ContainerDriver`]. Both kinds surface their output as a
//! stream of [`LogEvent`]s that the log pipeline consumes.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod container;
mod docker;
mod driver;
mod error;
mod event;
mod native;
mod process;

pub use container::{container_name, ContainerLaunch, ContainerLauncher};
pub use docker::DockerCli;
pub use driver::{ContainerDriver, ContainerInspect, ContainerRunSpec};
pub use error::{Error, Result};
pub use event::{LogEvent, LogEventStream, LogSource};
pub use native::{LaunchSpec, NativeLaunch, NativeLauncher};
pub use process::{pid_alive, ExitStatus, NativeHandle, StopOutcome};
