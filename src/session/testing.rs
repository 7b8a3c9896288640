//! In-memory runtime and exporter used by the controller tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, SandlotError};
use crate::export::{ExportedProject, OpenOptions, ProjectExporter};
use crate::project::ProjectDefinition;
use crate::runtime::{
    InstanceInfo, ReadyListeners, SandboxInstance, SandboxRuntime, ServerReady, SpawnedProcess,
    OUTPUT_CHANNEL_CAPACITY,
};

pub struct FakeRuntime {
    boots: AtomicUsize,
    fail_boot: bool,
    instance: Arc<FakeInstance>,
    processes: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProcessDriver>>,
}

impl FakeRuntime {
    /// Processes exit immediately with their scripted output (none by default).
    pub fn auto() -> Arc<Self> {
        Self::build(false, false, false)
    }

    /// Processes are driven by the test through [`FakeRuntime::next_process`].
    pub fn manual() -> Arc<Self> {
        Self::build(false, false, true)
    }

    pub fn failing_boot() -> Arc<Self> {
        Self::build(true, false, false)
    }

    pub fn failing_mount() -> Arc<Self> {
        Self::build(false, true, false)
    }

    fn build(fail_boot: bool, fail_mount: bool, manual: bool) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            boots: AtomicUsize::new(0),
            fail_boot,
            instance: Arc::new(FakeInstance {
                fail_mount,
                manual: manual.then_some(tx),
                scripts: Mutex::default(),
                failing_spawns: Mutex::default(),
                mounted: Mutex::default(),
                spawned: Mutex::default(),
                listeners: ReadyListeners::default(),
                shut_down: AtomicBool::new(false),
            }),
            processes: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    pub fn instance(&self) -> &FakeInstance {
        &self.instance
    }

    /// Wait for the controller to spawn the next process (manual mode).
    pub async fn next_process(&self) -> ProcessDriver {
        let mut rx = self.processes.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a spawn")
            .expect("runtime dropped")
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        // Let a concurrent duplicate start() run while this one is suspended
        tokio::task::yield_now().await;
        if self.fail_boot {
            return Err(SandlotError::Boot("runtime offline".to_string()));
        }
        Ok(self.instance.clone() as Arc<dyn SandboxInstance>)
    }
}

pub struct FakeInstance {
    fail_mount: bool,
    manual: Option<mpsc::UnboundedSender<ProcessDriver>>,
    scripts: Mutex<HashMap<String, (Vec<String>, i32)>>,
    failing_spawns: Mutex<HashSet<String>>,
    mounted: Mutex<Vec<String>>,
    spawned: Mutex<Vec<String>>,
    listeners: ReadyListeners,
    shut_down: AtomicBool,
}

impl FakeInstance {
    /// Output and exit code for a command line in auto mode.
    pub fn script(&self, command_line: &str, chunks: &[&str], exit_code: i32) {
        self.scripts.lock().unwrap().insert(
            command_line.to_string(),
            (chunks.iter().map(|c| c.to_string()).collect(), exit_code),
        );
    }

    pub fn fail_spawn_of(&self, command_line: &str) {
        self.failing_spawns
            .lock()
            .unwrap()
            .insert(command_line.to_string());
    }

    pub fn announce(&self, port: u16, url: &str) {
        self.listeners.announce(ServerReady {
            port,
            url: url.to_string(),
        });
    }

    pub fn mounted(&self) -> Vec<String> {
        self.mounted.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxInstance for FakeInstance {
    async fn mount(&self, project: &ProjectDefinition) -> Result<()> {
        if self.fail_mount {
            return Err(SandlotError::Mount("fixture rejected".to_string()));
        }
        let mut mounted = self.mounted.lock().unwrap();
        mounted.extend(project.files().iter().map(|f| f.path.clone()));
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess> {
        let command_line = std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        if self.failing_spawns.lock().unwrap().contains(&command_line) {
            return Err(SandlotError::Spawn {
                command: command_line,
                reason: "not found".to_string(),
            });
        }
        self.spawned.lock().unwrap().push(command_line.clone());

        let (exit_tx, exit_rx) = oneshot::channel();

        if let Some(drivers) = &self.manual {
            let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
            let _ = drivers.send(ProcessDriver {
                command: command_line,
                output: output_tx,
                exit: Some(exit_tx),
            });
            return Ok(SpawnedProcess {
                output: output_rx,
                exit: exit_rx,
            });
        }

        let (chunks, code) = self
            .scripts
            .lock()
            .unwrap()
            .get(&command_line)
            .cloned()
            .unwrap_or_default();
        let (output_tx, output_rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            output_tx.try_send(chunk).expect("capacity sized to script");
        }
        let _ = exit_tx.send(code);

        Ok(SpawnedProcess {
            output: output_rx,
            exit: exit_rx,
        })
    }

    fn on_server_ready(&self) -> mpsc::UnboundedReceiver<ServerReady> {
        self.listeners.subscribe()
    }

    fn info(&self) -> InstanceInfo {
        InstanceInfo {
            runtime: "fake".to_string(),
            instance_id: "fake-0".to_string(),
            metadata: HashMap::new(),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Test-side end of a manually driven process.
pub struct ProcessDriver {
    pub command: String,
    output: mpsc::Sender<String>,
    exit: Option<oneshot::Sender<i32>>,
}

impl ProcessDriver {
    pub async fn emit(&mut self, chunk: &str) {
        self.output
            .send(chunk.to_string())
            .await
            .expect("output relay dropped");
    }

    pub fn exit(&mut self, code: i32) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(code);
        }
    }
}

pub struct FakeExporter {
    fail: bool,
    calls: Mutex<Vec<(ExportedProject, OpenOptions)>>,
}

impl FakeExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: Mutex::default(),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: Mutex::default(),
        })
    }

    pub fn calls(&self) -> Vec<(ExportedProject, OpenOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProjectExporter for FakeExporter {
    fn open_project(&self, project: &ExportedProject, options: &OpenOptions) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((project.clone(), options.clone()));
        if self.fail {
            return Err(SandlotError::Export("no browser".to_string()));
        }
        Ok(())
    }
}
