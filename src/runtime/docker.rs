use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::types::DockerConfig;
use crate::error::{Result, SandlotError};
use crate::project::ProjectDefinition;
use crate::runtime::ready::ReadyListeners;
use crate::runtime::stream::stream_child;
use crate::runtime::traits::{
    InstanceInfo, SandboxInstance, SandboxRuntime, ServerReady, SpawnedProcess,
};

/// Docker sandbox runtime.
///
/// Boots a long-lived container that idles on `tail -f /dev/null`; files are
/// streamed in and processes started with `docker exec`. Configured ports are
/// published to ephemeral host ports on the loopback interface.
pub struct DockerRuntime {
    config: DockerConfig,
}

impl DockerRuntime {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Check if the Docker runtime is available on this system.
    ///
    /// Returns true if `program` is installed and its daemon is accessible.
    pub async fn is_available(program: &str) -> bool {
        match Command::new(program)
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>> {
        if !Self::is_available(&self.config.program).await {
            return Err(SandlotError::Boot(format!(
                "Docker daemon is not accessible through '{}'. Ensure Docker is installed and running.",
                self.config.program
            )));
        }

        info!(image = %self.config.image, "Starting Docker sandbox container...");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(["run", "-d"]);

        // Memory limit
        cmd.arg(format!("--memory={}m", self.config.memory_limit_mb));

        // Published ports, host side picked by Docker
        for port in &self.config.publish_ports {
            cmd.arg("-p");
            cmd.arg(format!("127.0.0.1::{}", port));
        }

        // Working directory
        cmd.args(["-w", &self.config.workdir]);

        // Image and command to keep container running
        cmd.arg(&self.config.image);
        cmd.args(["tail", "-f", "/dev/null"]);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| SandlotError::Boot(format!("Failed to run docker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandlotError::Boot(format!(
                "Failed to start Docker container: {}",
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(container_id = %container_id, "Docker sandbox container started");

        Ok(Arc::new(DockerInstance::new(
            container_id,
            self.config.clone(),
        )))
    }
}

/// A running sandbox container.
pub struct DockerInstance {
    container_id: String,
    config: DockerConfig,
    listeners: ReadyListeners,
    ports: mpsc::UnboundedSender<u16>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl DockerInstance {
    fn new(container_id: String, config: DockerConfig) -> Self {
        let listeners = ReadyListeners::default();
        let (ports, mut port_rx) = mpsc::unbounded_channel::<u16>();

        let announcer = listeners.clone();
        let cid = container_id.clone();
        let program = config.program.clone();
        tokio::spawn(async move {
            while let Some(port) = port_rx.recv().await {
                match resolve_host_address(&program, &cid, port).await {
                    Some(address) => {
                        announcer.announce(ServerReady {
                            port,
                            url: format!("http://{}", address),
                        });
                    }
                    None => {
                        warn!(
                            container_id = %cid,
                            port = port,
                            "Server is listening on a port that is not published; add it to docker.publish_ports"
                        );
                    }
                }
            }
        });

        let (shutdown, _) = watch::channel(false);
        Self {
            container_id,
            config,
            listeners,
            ports,
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    /// Write one file into the container through `docker exec -i`.
    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let mut child = Command::new(&self.config.program)
            .args(["exec", "-i", "-w", &self.config.workdir, &self.container_id])
            .args(["sh", "-c", r#"mkdir -p "$(dirname "$1")" && cat > "$1""#, "sh", path])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandlotError::Mount(format!("Failed to run docker exec: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .await
                .map_err(|e| SandlotError::Mount(format!("{}: {}", path, e)))?;
            // Dropping stdin closes the pipe so `cat` sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SandlotError::Mount(format!("{}: {}", path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandlotError::Mount(format!("{}: {}", path, stderr.trim())));
        }

        Ok(())
    }

    /// Stop and remove the container.
    async fn stop_container(&self) -> Result<()> {
        info!(container_id = %self.container_id, "Stopping Docker sandbox container...");

        // Remove the container, stopping it first
        let rm_output = Command::new(&self.config.program)
            .args(["rm", "-f", &self.container_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SandlotError::Other(anyhow::anyhow!("Failed to remove container: {}", e)))?;

        if !rm_output.status.success() {
            let stderr = String::from_utf8_lossy(&rm_output.stderr);
            warn!(container_id = %self.container_id, error = %stderr, "Failed to remove container");
        }

        info!(container_id = %self.container_id, "Docker sandbox container stopped");
        Ok(())
    }
}

#[async_trait]
impl SandboxInstance for DockerInstance {
    async fn mount(&self, project: &ProjectDefinition) -> Result<()> {
        for file in project.files() {
            self.write_file(&file.path, &file.contents).await?;
            debug!(container_id = %self.container_id, path = %file.path, "Mounted file");
        }
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess> {
        debug!(container_id = %self.container_id, command = %command, args = ?args, "Executing via docker exec");

        let child = Command::new(&self.config.program)
            .args(["exec", "-w", &self.config.workdir, "-e", "FORCE_COLOR=1"])
            .arg(&self.container_id)
            .arg(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandlotError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

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
            runtime: "docker".to_string(),
            instance_id: self.container_id.clone(),
            metadata: HashMap::from([
                ("image".to_string(), self.config.image.clone()),
                ("workdir".to_string(), self.config.workdir.clone()),
                (
                    "published_ports".to_string(),
                    self.config
                        .publish_ports
                        .iter()
                        .map(|p| p.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            ]),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.send_replace(true);
        self.stop_container().await
    }
}

/// Ask Docker which host address a container port is published on.
async fn resolve_host_address(program: &str, container_id: &str, port: u16) -> Option<String> {
    let output = Command::new(program)
        .args(["port", container_id, &format!("{}/tcp", port)])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_port_mapping(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `docker port` output ("127.0.0.1:49153", "[::1]:49153", one per
/// line) into a `host:port` address usable from the host.
fn parse_port_mapping(output: &str) -> Option<String> {
    output.lines().map(str::trim).find_map(|line| {
        let (host, port) = line.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        let host = match host {
            "0.0.0.0" | "" => "localhost",
            "[::]" => "localhost",
            other => other,
        };
        Some(format!("{}:{}", host, port))
    })
}
