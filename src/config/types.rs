use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandlotConfig {
    pub runtime: RuntimeConfig,
    pub session: SessionConfig,
    pub export: ExportConfig,
    pub preview: PreviewConfig,
}

/// The type of sandbox runtime to boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Run the project in a scratch directory on the host
    Local,
    /// Run the project inside a Docker container
    Docker,
    /// Docker if the daemon is reachable, local otherwise
    #[default]
    Auto,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Which runtime to boot
    pub kind: RuntimeKind,
    /// Local runtime configuration
    pub local: LocalConfig,
    /// Docker runtime configuration
    pub docker: DockerConfig,
}

/// Local runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory under which session workspaces are created (data dir if unset)
    pub workspace_root: Option<PathBuf>,
    /// Program whose presence is checked before booting
    pub required_program: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            required_program: "npm".to_string(),
        }
    }
}

/// Docker runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker-compatible CLI used for every container operation
    pub program: String,
    /// Image providing node and npm
    pub image: String,
    /// Working directory inside the container
    pub workdir: String,
    /// Container ports published to ephemeral host ports
    pub publish_ports: Vec<u16>,
    /// Memory limit in MB
    pub memory_limit_mb: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            image: "node:20-slim".to_string(),
            workdir: "/workspace".to_string(),
            publish_ports: vec![3111],
            memory_limit_mb: 1024,
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Session pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Dependency installation step
    pub install: CommandSpec,
    /// Long-running server step
    pub start: CommandSpec,
    /// Message that replaces the output log when the sandbox cannot start
    pub failure_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            install: CommandSpec::new("npm", &["install"]),
            start: CommandSpec::new("npm", &["run", "start"]),
            failure_message: "Failed to start the sandbox. Check the logs for details.".to_string(),
        }
    }
}

/// Project export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// StackBlitz base URL
    pub base_url: String,
    pub title: String,
    pub description: String,
    /// StackBlitz project template
    pub template: String,
    /// File focused when the project opens
    pub open_file: String,
    /// Launch the platform opener on the generated form
    pub open_browser: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stackblitz.com".to_string(),
            title: "Sandlot demo".to_string(),
            description: "A tiny Express server booted inside a sandbox".to_string(),
            template: "node".to_string(),
            open_file: "index.js".to_string(),
            open_browser: true,
        }
    }
}

/// Preview probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Fetch the preview address when it resolves and on every refresh
    pub fetch: bool,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            fetch: true,
            timeout_seconds: 10,
        }
    }
}
