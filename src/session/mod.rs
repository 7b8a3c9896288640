mod ansi;
mod controller;

#[cfg(test)]
mod testing;

use serde::Serialize;

pub use ansi::strip_control_sequences;
pub use controller::SessionController;

/// Where a session is in its pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    /// `start()` has not been called
    #[default]
    Idle,
    /// Booting the runtime and mounting the project
    Booting,
    /// The install step is running
    InstallRunning,
    /// The server step has been launched
    StartRunning,
    /// A readiness notification has arrived
    Ready,
    /// Boot, mount or spawn failed; terminal
    Failed { error: String },
}

/// Observable state of one sandbox session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Cleaned output of both steps in arrival order, plus readiness lines
    pub output_log: String,
    /// True while `start()` is in flight
    pub is_booting: bool,
    /// Address of the most recently announced server
    pub preview_address: Option<String>,
    /// Bumped by `refresh()` so views can reload the preview
    pub refresh_token: u64,
    pub phase: SessionPhase,
}

impl SessionState {
    pub fn is_failed(&self) -> bool {
        matches!(self.phase, SessionPhase::Failed { .. })
    }
}
