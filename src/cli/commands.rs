use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::args::{ConfigAction, ConfigArgs, ExportArgs, FilesArgs, InitArgs, OutputFormat, RunArgs};
use crate::config::loader::{get_cache_dir, get_config_path};
use crate::config::types::SandlotConfig;
use crate::error::{Result, SandlotError};
use crate::export::{ExportMetadata, ExportedProject, OpenOptions, StackblitzExporter};
use crate::preview::PreviewProbe;
use crate::project::ProjectDefinition;
use crate::runtime::{available_runtimes, create_runtime};
use crate::session::{SessionController, SessionPhase, SessionState};

// ============================================================================
// Session Commands
// ============================================================================

/// Run the demo project in a sandbox until the user quits
pub async fn run(args: RunArgs, mut config: SandlotConfig, format: OutputFormat) -> Result<()> {
    if let Some(kind) = args.runtime {
        config.runtime.kind = kind;
    }
    if args.no_fetch {
        config.preview.fetch = false;
    }

    let runtime = create_runtime(&config.runtime).await;
    info!(runtime = runtime.name(), "Starting sandbox session");

    let exporter = Arc::new(StackblitzExporter::new(&config.export, get_cache_dir()));
    let controller = Arc::new(
        SessionController::new(runtime, exporter)
            .with_settings(config.session.clone())
            .with_export_metadata(ExportMetadata::from(&config.export)),
    );

    let probe = if config.preview.fetch {
        Some(PreviewProbe::new(&config.preview)?)
    } else {
        None
    };
    let view = tokio::spawn(render(
        controller.subscribe(),
        probe,
        format,
        std::io::stdout(),
    ));

    tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });

    eprintln!("Keys: r + Enter refreshes the preview, e + Enter exports to StackBlitz, q + Enter quits");

    let mut state = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = state.wait_for(SessionState::is_failed) => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "r" => {
                        controller.refresh();
                    }
                    "e" => controller.export_project(),
                    "q" => break,
                    "" => {}
                    other => eprintln!("Unknown key '{}'", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }

    controller.shutdown().await?;
    // Give the view a moment to print whatever arrived last
    let _ = tokio::time::timeout(Duration::from_millis(250), view).await;

    match controller.snapshot().phase {
        SessionPhase::Failed { error } => Err(SandlotError::Other(anyhow::anyhow!(error))),
        _ => Ok(()),
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ViewEvent<'a> {
    Output {
        text: &'a str,
    },
    Failed {
        message: &'a str,
        error: &'a str,
    },
    Preview {
        url: &'a str,
        refresh_token: u64,
        status: Option<u16>,
        headline: Option<&'a str>,
    },
}

/// Print the session as it changes: new log text, failures and the preview.
///
/// Returns once the session fails or the controller is dropped.
async fn render<W: Write>(
    mut rx: watch::Receiver<SessionState>,
    probe: Option<PreviewProbe>,
    format: OutputFormat,
    mut out: W,
) {
    let mut printed = 0usize;
    let mut last_preview: Option<(String, u64)> = None;

    loop {
        let state = rx.borrow_and_update().clone();

        if let SessionPhase::Failed { error } = &state.phase {
            emit(&mut out, &format, &ViewEvent::Failed {
                message: &state.output_log,
                error,
            });
            break;
        } else if state.output_log.len() > printed {
            emit(&mut out, &format, &ViewEvent::Output {
                text: &state.output_log[printed..],
            });
            printed = state.output_log.len();
        }

        if let Some(url) = &state.preview_address {
            let key = (url.clone(), state.refresh_token);
            if last_preview.as_ref() != Some(&key) {
                last_preview = Some(key);
                let page = match &probe {
                    Some(probe) => match probe.fetch(url).await {
                        Ok(page) => Some(page),
                        Err(e) => {
                            warn!(url = %url, error = %e, "Preview fetch failed");
                            None
                        }
                    },
                    None => None,
                };
                emit(&mut out, &format, &ViewEvent::Preview {
                    url,
                    refresh_token: state.refresh_token,
                    status: page.as_ref().map(|p| p.status),
                    headline: page.as_ref().and_then(|p| p.headline.as_deref()),
                });
            }
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn emit(out: &mut impl Write, format: &OutputFormat, event: &ViewEvent<'_>) {
    let _ = match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(line) => writeln!(out, "{}", line),
            Err(e) => {
                warn!(error = %e, "Failed to encode view event");
                Ok(())
            }
        },
        OutputFormat::Text => match event {
            ViewEvent::Output { text } => write!(out, "{}", text),
            ViewEvent::Failed { message, .. } => writeln!(out, "{}", message),
            ViewEvent::Preview {
                url,
                refresh_token,
                status,
                headline,
            } => {
                let detail = match (status, headline) {
                    (Some(status), Some(headline)) => format!(" [{}] {}", status, headline),
                    (Some(status), None) => format!(" [{}]", status),
                    _ => String::new(),
                };
                writeln!(out, "==> Preview #{}: {}{}", refresh_token, url, detail)
            }
        },
    };
    let _ = out.flush();
}

/// Write the StackBlitz form for the demo project and open it
pub async fn export(args: ExportArgs, mut config: SandlotConfig, format: OutputFormat) -> Result<()> {
    if args.no_open {
        config.export.open_browser = false;
    }
    if let Some(open_file) = args.open_file {
        config.export.open_file = open_file;
    }

    let project = ProjectDefinition::demo();
    if project.get(&config.export.open_file).is_none() {
        return Err(SandlotError::Config(format!(
            "export.open_file '{}' is not a project file",
            config.export.open_file
        )));
    }

    let metadata = ExportMetadata::from(&config.export);
    let exported = ExportedProject {
        files: project,
        title: metadata.title,
        description: metadata.description,
        template: metadata.template,
    };
    let options = OpenOptions {
        open_file: metadata.open_file,
    };

    let exporter = StackblitzExporter::new(&config.export, get_cache_dir());
    let path = exporter.export(&exported, &options)?;

    match format {
        OutputFormat::Text => {
            println!("{}", path.display());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "form": path.display().to_string(),
                    "open_file": options.open_file,
                    "opened": config.export.open_browser,
                })
            );
        }
    }

    Ok(())
}

/// Print the files that get mounted into the sandbox
pub async fn files(args: FilesArgs, format: OutputFormat) -> Result<()> {
    let project = ProjectDefinition::demo();

    if let Some(path) = args.path {
        let contents = project.get(&path).ok_or_else(|| SandlotError::InvalidProjectPath {
            path: path.clone(),
            reason: "not part of the project".to_string(),
        })?;
        match format {
            OutputFormat::Text => print!("{}", contents),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "path": path, "contents": contents }))
            }
        }
        return Ok(());
    }

    match format {
        OutputFormat::Text => {
            for file in project.files() {
                println!("==> {} <==", file.path);
                print!("{}", file.contents);
                println!();
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(project.files())?);
        }
    }
    Ok(())
}

/// List sandbox runtimes
pub async fn runtimes(config: SandlotConfig, format: OutputFormat) -> Result<()> {
    let runtimes = available_runtimes(&config.runtime).await;

    match format {
        OutputFormat::Text => {
            println!("{:<10} {:<10} DESCRIPTION", "RUNTIME", "STATUS");
            println!("{}", "-".repeat(60));
            for runtime in runtimes {
                let status = if runtime.available { "ready" } else { "missing" };
                let reason = runtime
                    .unavailable_reason
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                println!(
                    "{:<10} {:<10} {}{}",
                    runtime.name, status, runtime.description, reason
                );
            }
            println!();
            println!("Configured: {:?}", config.runtime.kind);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&runtimes)?);
        }
    }
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write default configuration
    let default_config = SandlotConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| SandlotError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # See which runtimes work on this machine");
    println!("  sandlot runtimes");
    println!();
    println!("  # Boot the demo server and watch its output");
    println!("  sandlot run");
    println!();
    println!("  # Open the same project on StackBlitz");
    println!("  sandlot export");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: SandlotConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| SandlotError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::types::PreviewConfig;

    /// Writer that keeps everything the view printed.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn events(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }

        async fn wait_for(&self, count: usize) -> Vec<serde_json::Value> {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let events = self.events();
                    if events.len() >= count {
                        return events;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("timed out waiting for view output")
        }
    }

    /// Serve a fixed page, counting requests.
    async fn serve_page(hits: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let body = "Hello from the sandbox";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_render_prints_new_output_previews_and_failure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = serve_page(hits.clone()).await;

        let (tx, rx) = watch::channel(SessionState::default());
        let out = Captured::default();
        let probe = PreviewProbe::new(&PreviewConfig::default()).unwrap();
        let view = tokio::spawn(render(rx, Some(probe), OutputFormat::Json, out.clone()));

        // Only the part of the log not printed yet
        tx.send_modify(|s| s.output_log.push_str("added 1 package\n"));
        out.wait_for(1).await;
        tx.send_modify(|s| s.output_log.push_str("App is live\n"));
        let events = out.wait_for(2).await;
        assert_eq!(events[0], serde_json::json!({ "event": "output", "text": "added 1 package\n" }));
        assert_eq!(events[1], serde_json::json!({ "event": "output", "text": "App is live\n" }));

        // The page is fetched when the address resolves and on every refresh
        tx.send_modify(|s| s.preview_address = Some(url.clone()));
        let events = out.wait_for(3).await;
        assert_eq!(events[2]["event"], "preview");
        assert_eq!(events[2]["url"], url.as_str());
        assert_eq!(events[2]["refresh_token"], 0);
        assert_eq!(events[2]["status"], 200);
        assert_eq!(events[2]["headline"], "Hello from the sandbox");

        tx.send_modify(|s| s.refresh_token += 1);
        let events = out.wait_for(4).await;
        assert_eq!(events[3]["event"], "preview");
        assert_eq!(events[3]["refresh_token"], 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // A change that touches neither the log nor the preview prints nothing
        tx.send_modify(|s| s.is_booting = false);

        tx.send_modify(|s| {
            s.output_log = "Failed to start the sandbox.".to_string();
            s.phase = SessionPhase::Failed {
                error: "runtime offline".to_string(),
            };
        });
        tokio::time::timeout(Duration::from_secs(5), view)
            .await
            .expect("view kept running after the failure")
            .unwrap();

        let events = out.events();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[4],
            serde_json::json!({
                "event": "failed",
                "message": "Failed to start the sandbox.",
                "error": "runtime offline",
            })
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_view_events_serialize_with_tag() {
        let event = ViewEvent::Preview {
            url: "http://localhost:3111",
            refresh_token: 2,
            status: Some(200),
            headline: None,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "preview");
        assert_eq!(json["refresh_token"], 2);
        assert_eq!(json["status"], 200);

        let json = serde_json::to_value(ViewEvent::Output { text: "OK\n" }).unwrap();
        assert_eq!(json, serde_json::json!({ "event": "output", "text": "OK\n" }));
    }

    #[tokio::test]
    async fn test_export_rejects_unknown_open_file() {
        let args = ExportArgs {
            no_open: true,
            open_file: Some("missing.js".to_string()),
        };
        let result = export(args, SandlotConfig::default(), OutputFormat::Text).await;
        assert!(matches!(result, Err(SandlotError::Config(_))));
    }
}
