use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::loader::get_data_dir;
use crate::config::types::LocalConfig;
use crate::error::{Result, SandlotError};
use crate::project::ProjectDefinition;
use crate::runtime::ready::ReadyListeners;
use crate::runtime::stream::stream_child;
use crate::runtime::traits::{
    InstanceInfo, SandboxInstance, SandboxRuntime, ServerReady, SpawnedProcess,
};

/// Host workspace runtime.
///
/// Each boot creates a fresh directory and runs processes directly on the
/// host inside it. This gives no isolation beyond the working directory but
/// needs nothing more than Node.js installed.
pub struct LocalRuntime {
    config: LocalConfig,
}

impl LocalRuntime {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    /// Check if the local runtime is usable on this system.
    ///
    /// Returns true if the required program is on PATH.
    pub fn is_available(program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn workspace_root(&self) -> PathBuf {
        self.config
            .workspace_root
            .clone()
            .unwrap_or_else(|| get_data_dir().join("workspaces"))
    }
}

#[async_trait]
impl SandboxRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>> {
        check_program_installed(&self.config.required_program)?;

        let id = generate_workspace_id();
        let workdir = self.workspace_root().join(&id);
        tokio::fs::create_dir_all(&workdir).await.map_err(|e| {
            SandlotError::Boot(format!(
                "Cannot create workspace {}: {}",
                workdir.display(),
                e
            ))
        })?;

        info!(id = %id, workdir = %workdir.display(), "Local workspace booted");
        Ok(Arc::new(LocalInstance::new(id, workdir)))
    }
}

/// A workspace directory plus the processes running in it.
pub struct LocalInstance {
    id: String,
    workdir: PathBuf,
    listeners: ReadyListeners,
    ports: mpsc::UnboundedSender<u16>,
    shutdown: watch::Sender<bool>,
    /// Process group of every spawned process; each leads its own group
    groups: Mutex<Vec<u32>>,
    stopped: AtomicBool,
}

impl LocalInstance {
    fn new(id: String, workdir: PathBuf) -> Self {
        let listeners = ReadyListeners::default();
        let (ports, mut port_rx) = mpsc::unbounded_channel::<u16>();

        // Host and sandbox share a network namespace, ports map one to one
        let announcer = listeners.clone();
        tokio::spawn(async move {
            while let Some(port) = port_rx.recv().await {
                announcer.announce(ServerReady {
                    port,
                    url: format!("http://localhost:{}", port),
                });
            }
        });

        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            workdir,
            listeners,
            ports,
            shutdown,
            groups: Mutex::default(),
            stopped: AtomicBool::new(false),
        }
    }

    fn lock_groups(&self) -> std::sync::MutexGuard<'_, Vec<u32>> {
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SandboxInstance for LocalInstance {
    async fn mount(&self, project: &ProjectDefinition) -> Result<()> {
        for file in project.files() {
            let path = self.workdir.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SandlotError::Mount(format!("{}: {}", parent.display(), e))
                })?;
            }
            tokio::fs::write(&path, &file.contents)
                .await
                .map_err(|e| SandlotError::Mount(format!("{}: {}", file.path, e)))?;
            debug!(path = %path.display(), bytes = file.contents.len(), "Mounted file");
        }
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess> {
        debug!(command = %command, args = ?args, "Spawning process in local workspace");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own group so shutdown reaches grandchildren (npm -> nodemon -> node)
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| SandlotError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(pid) = child.id() {
            self.lock_groups().push(pid);
        }

        Ok(stream_child(
            child,
            command.to_string(),
            self.ports.clone(),
            self.shutdown.subscribe(),
        ))
    }

    fn on_server_ready(&self) -> mpsc::UnboundedReceiver<ServerReady> {
        self.listeners.subscribe()
    }

    fn info(&self) -> InstanceInfo {
        InstanceInfo {
            runtime: "local".to_string(),
            instance_id: self.id.clone(),
            metadata: HashMap::from([(
                "workdir".to_string(),
                self.workdir.display().to_string(),
            )]),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(id = %self.id, "Stopping local workspace processes");
        let groups = std::mem::take(&mut *self.lock_groups());
        for pgid in groups {
            kill_process_group(pgid);
        }
        self.shutdown.send_replace(true);

        if let Err(e) = tokio::fs::remove_dir_all(&self.workdir).await {
            warn!(workdir = %self.workdir.display(), error = %e, "Failed to remove workspace");
        } else {
            debug!(workdir = %self.workdir.display(), "Removed workspace");
        }
        Ok(())
    }
}

/// Kill every process in a group. Groups that already exited are skipped.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = pgid, "Killed process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid, error = %e, "Failed to kill process group"),
    }
}

/// Without process groups only the direct child is stopped, through the
/// shutdown signal.
#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Check that the package manager the session needs is on PATH
fn check_program_installed(program: &str) -> Result<()> {
    let path = which::which(program)
        .map_err(|_| SandlotError::Boot(format!("{} is not installed or not on PATH", program)))?;

    info!(program = %program, path = %path.display(), "Found package manager");
    Ok(())
}

/// Generate a short, unique workspace ID
fn generate_workspace_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    // Timestamp + counter, base36 for compactness
    let combined = (timestamp & 0xFFFFFF) << 8 | (counter as u64 & 0xFF);
    format_base36(combined)
}

/// Format a number as base36 string
fn format_base36(mut n: u64) -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }

    let mut result = Vec::new();
    while n > 0 {
        result.push(CHARS[(n % 36) as usize] as char);
        n /= 36;
    }
    result.iter().rev().collect()
}
