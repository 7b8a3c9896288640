use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::types::SessionConfig;
use crate::error::Result;
use crate::export::{ExportMetadata, ExportedProject, OpenOptions, ProjectExporter};
use crate::project::ProjectDefinition;
use crate::runtime::{SandboxInstance, SandboxRuntime, ServerReady};
use crate::session::{strip_control_sequences, SessionPhase, SessionState};

/// Drives one sandbox session from cold start to a running server.
///
/// The pipeline is boot, mount, install (awaited), start (not awaited), then
/// readiness. It runs at most once per controller and cannot be cancelled.
/// Views observe progress through [`SessionController::subscribe`] and never
/// mutate the state themselves.
pub struct SessionController {
    runtime: Arc<dyn SandboxRuntime>,
    exporter: Arc<dyn ProjectExporter>,
    project: ProjectDefinition,
    settings: SessionConfig,
    export: ExportMetadata,
    started: AtomicBool,
    state: Arc<watch::Sender<SessionState>>,
    instance: Mutex<Option<Arc<dyn SandboxInstance>>>,
}

impl SessionController {
    /// Create a controller for the demo project with default settings.
    pub fn new(runtime: Arc<dyn SandboxRuntime>, exporter: Arc<dyn ProjectExporter>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            runtime,
            exporter,
            project: ProjectDefinition::demo(),
            settings: SessionConfig::default(),
            export: ExportMetadata::default(),
            started: AtomicBool::new(false),
            state: Arc::new(state),
            instance: Mutex::new(None),
        }
    }

    pub fn with_project(mut self, project: ProjectDefinition) -> Self {
        self.project = project;
        self
    }

    pub fn with_settings(mut self, settings: SessionConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_export_metadata(mut self, export: ExportMetadata) -> Self {
        self.export = export;
        self
    }

    /// Boot the sandbox and bring the project's server up.
    ///
    /// Only the first call does anything; later or concurrent calls return
    /// immediately. Boot, mount and spawn failures replace the output log
    /// with the configured failure message. The install step's exit status
    /// is logged but never stops the pipeline.
    pub async fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session already started");
            return;
        }

        self.state.send_modify(|s| {
            s.is_booting = true;
            s.phase = SessionPhase::Booting;
        });

        if let Err(e) = self.run_pipeline().await {
            error!(error = %e, "Sandbox session failed to start");
            let message = self.settings.failure_message.clone();
            self.state.send_modify(|s| {
                s.output_log = message;
                s.phase = SessionPhase::Failed {
                    error: e.to_string(),
                };
            });
        }

        self.state.send_modify(|s| s.is_booting = false);
    }

    async fn run_pipeline(&self) -> Result<()> {
        let instance = self.runtime.boot().await?;
        let info = instance.info();
        info!(runtime = %info.runtime, instance = %info.instance_id, "Sandbox booted");
        *self.lock_instance() = Some(instance.clone());

        instance.mount(&self.project).await?;
        info!(files = self.project.len(), "Project mounted");

        let install = &self.settings.install;
        self.set_phase(SessionPhase::InstallRunning);
        let process = instance.spawn(&install.program, &install.args).await?;
        relay_output(self.state.clone(), "install", process.output);

        let code = wait_exit(process.exit).await;
        if code == 0 {
            info!(command = %install, "Install step finished");
        } else {
            // Tolerated: the server step runs whatever the install outcome
            warn!(command = %install, exit_code = code, "Install step failed; starting anyway");
        }

        // Listen before launching so a fast server's announcement is not lost
        watch_readiness(self.state.clone(), instance.on_server_ready());

        let start = &self.settings.start;
        self.set_phase(SessionPhase::StartRunning);
        let process = instance.spawn(&start.program, &start.args).await?;
        relay_output(self.state.clone(), "start", process.output);

        let command = start.to_string();
        let exit = process.exit;
        tokio::spawn(async move {
            let code = wait_exit(exit).await;
            info!(command = %command, exit_code = code, "Server step exited");
        });

        Ok(())
    }

    /// Bump the refresh token. The session itself is untouched.
    pub fn refresh(&self) -> u64 {
        let mut token = 0;
        self.state.send_modify(|s| {
            s.refresh_token += 1;
            token = s.refresh_token;
        });
        debug!(refresh_token = token, "Preview refresh requested");
        token
    }

    /// Hand the project to the exporter. Failures are only logged.
    pub fn export_project(&self) {
        let project = ExportedProject {
            files: self.project.clone(),
            title: self.export.title.clone(),
            description: self.export.description.clone(),
            template: self.export.template.clone(),
        };
        let options = OpenOptions {
            open_file: self.export.open_file.clone(),
        };

        match self.exporter.open_project(&project, &options) {
            Ok(()) => info!(title = %project.title, "Project exported"),
            Err(e) => warn!(error = %e, "Project export failed"),
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Stop the booted instance, if any. Does not interrupt a `start()` in flight.
    pub async fn shutdown(&self) -> Result<()> {
        let instance = self.lock_instance().clone();
        match instance {
            Some(instance) => instance.shutdown().await,
            None => Ok(()),
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        debug!(phase = ?phase, "Session phase");
        self.state.send_modify(|s| s.phase = phase);
    }

    fn lock_instance(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn SandboxInstance>>> {
        self.instance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn wait_exit(exit: oneshot::Receiver<i32>) -> i32 {
    exit.await.unwrap_or_else(|_| {
        warn!("Process ended without reporting an exit code");
        -1
    })
}

/// Append cleaned chunks to the log as they arrive.
fn relay_output(
    state: Arc<watch::Sender<SessionState>>,
    step: &'static str,
    mut output: mpsc::Receiver<String>,
) {
    tokio::spawn(async move {
        while let Some(chunk) = output.recv().await {
            let cleaned = strip_control_sequences(&chunk);
            if cleaned.is_empty() {
                continue;
            }
            state.send_if_modified(|s| {
                // A failed session shows only the failure message
                if s.is_failed() {
                    return false;
                }
                s.output_log.push_str(&cleaned);
                true
            });
        }
        debug!(step = step, "Output stream closed");
    });
}

/// Record every readiness notification for the life of the session.
fn watch_readiness(
    state: Arc<watch::Sender<SessionState>>,
    mut ready: mpsc::UnboundedReceiver<ServerReady>,
) {
    tokio::spawn(async move {
        while let Some(event) = ready.recv().await {
            info!(port = event.port, url = %event.url, "Preview ready");
            state.send_if_modified(|s| {
                if s.is_failed() {
                    return false;
                }
                s.output_log
                    .push_str(&format!("Server ready at {} (port {})\n", event.url, event.port));
                s.preview_address = Some(event.url.clone());
                s.phase = SessionPhase::Ready;
                true
            });
        }
    });
}
