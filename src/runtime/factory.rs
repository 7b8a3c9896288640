use std::sync::Arc;

use tracing::debug;

use crate::config::types::{RuntimeConfig, RuntimeKind};
use crate::runtime::docker::DockerRuntime;
use crate::runtime::local::LocalRuntime;
use crate::runtime::traits::SandboxRuntime;

/// Create a sandbox runtime based on the configuration.
///
/// Booting is deferred to the session; this only selects and constructs the
/// runtime. A runtime that turns out to be unusable fails in `boot`, so the
/// session reports it like any other boot failure.
pub async fn create_runtime(config: &RuntimeConfig) -> Arc<dyn SandboxRuntime> {
    let docker_available = match config.kind {
        RuntimeKind::Auto => DockerRuntime::is_available(&config.docker.program).await,
        _ => false,
    };
    let kind = resolve_runtime_kind(&config.kind, docker_available);
    debug!(requested = ?config.kind, resolved = ?kind, "Selected sandbox runtime");

    match kind {
        RuntimeKind::Docker => Arc::new(DockerRuntime::new(config.docker.clone())),
        RuntimeKind::Local | RuntimeKind::Auto => Arc::new(LocalRuntime::new(config.local.clone())),
    }
}

/// Resolve the runtime kind, handling Auto selection.
fn resolve_runtime_kind(requested: &RuntimeKind, docker_available: bool) -> RuntimeKind {
    match requested {
        // Priority: Docker (isolated) > Local
        RuntimeKind::Auto if docker_available => RuntimeKind::Docker,
        RuntimeKind::Auto => RuntimeKind::Local,
        other => other.clone(),
    }
}

/// Get information about available runtimes on this system.
pub async fn available_runtimes(config: &RuntimeConfig) -> Vec<RuntimeInfo> {
    let local_available = LocalRuntime::is_available(&config.local.required_program);
    let docker_available = DockerRuntime::is_available(&config.docker.program).await;

    vec![
        RuntimeInfo {
            name: "local",
            available: local_available,
            description: "Host workspace directory (no isolation)",
            unavailable_reason: if local_available {
                None
            } else {
                Some(format!("'{}' not found on PATH", config.local.required_program))
            },
        },
        RuntimeInfo {
            name: "docker",
            available: docker_available,
            description: "Docker container sandbox",
            unavailable_reason: if docker_available {
                None
            } else {
                Some("Docker daemon not accessible".to_string())
            },
        },
    ]
}

/// Information about a sandbox runtime.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<String>,
}
