use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::project::ProjectDefinition;

/// Handle to a process running inside a sandbox instance.
///
/// `output` carries decoded text chunks in the order the process wrote them
/// (stdout and stderr merged). `exit` resolves once with the exit code; it
/// may resolve before `output` is drained.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub output: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<i32>,
}

/// A server inside the sandbox became reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReady {
    /// Port the server bound inside the sandbox
    pub port: u16,
    /// Address the host can reach it on
    pub url: String,
}

/// Information about a booted sandbox instance
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// Runtime type identifier
    pub runtime: String,
    /// Instance identifier (workspace id, container id, etc.)
    pub instance_id: String,
    /// Additional runtime-specific metadata
    pub metadata: HashMap<String, String>,
}

/// A sandbox runtime able to boot isolated instances.
///
/// This trait abstracts the execution environment, allowing different runtimes
/// (a host workspace, a Docker container) to be used interchangeably.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Returns the runtime name (e.g., "local", "docker")
    fn name(&self) -> &str;

    /// Boot a fresh instance
    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>>;
}

/// A booted sandbox able to hold files and run processes.
#[async_trait]
pub trait SandboxInstance: Send + Sync {
    /// Write every file of the project into the instance's working directory
    async fn mount(&self, project: &ProjectDefinition) -> Result<()>;

    /// Start a process in the instance's working directory
    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess>;

    /// Register a listener for server readiness. The listener stays active
    /// for the life of the instance and may receive any number of events.
    fn on_server_ready(&self) -> mpsc::UnboundedReceiver<ServerReady>;

    /// Get information about the instance
    fn info(&self) -> InstanceInfo;

    /// Stop all processes and release the instance.
    /// Default implementation is a no-op.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
