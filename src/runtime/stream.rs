use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::runtime::ready::LineScanner;
use crate::runtime::traits::SpawnedProcess;

/// Chunks buffered between a process and its consumer before the reader
/// stops pulling from the pipe.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 64;

const READ_BUFFER_SIZE: usize = 4096;

/// Incremental UTF-8 decoder that holds back a multi-byte character split
/// across reads instead of mangling it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush bytes still held back when the stream ends.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Relay a child's stdout and stderr as one chunk stream and report its exit.
///
/// Ports announced in the output are sent on `ports`. Flipping `shutdown` to
/// `true` kills the child.
pub fn stream_child(
    mut child: Child,
    label: String,
    ports: mpsc::UnboundedSender<u16>,
    mut shutdown: watch::Receiver<bool>,
) -> SpawnedProcess {
    let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    let (exit_tx, exit_rx) = oneshot::channel();

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, output_tx.clone(), ports.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, output_tx, ports));
    }

    tokio::spawn(async move {
        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop_requested(&mut shutdown) => None,
        };

        let status = match finished {
            Some(status) => status,
            None => {
                debug!(process = %label, "Killing process on shutdown");
                if let Err(e) = child.start_kill() {
                    warn!(process = %label, error = %e, "Failed to kill process");
                }
                child.wait().await
            }
        };

        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(process = %label, error = %e, "Failed to wait for process");
                -1
            }
        };
        debug!(process = %label, exit_code = code, "Process exited");

        // The receiver may already be gone; nobody waiting is fine
        let _ = exit_tx.send(code);
    });

    SpawnedProcess {
        output: output_rx,
        exit: exit_rx,
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Owner dropped without asking for a stop; let the process run on
        std::future::pending::<()>().await;
    }
}

async fn pump<R>(mut reader: R, output: mpsc::Sender<String>, ports: mpsc::UnboundedSender<u16>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8Decoder::default();
    let mut scanner = LineScanner::default();
    let mut consumer_gone = false;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Output pipe closed with error");
                break;
            }
        };

        let text = decoder.push(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        for port in scanner.feed(&text) {
            let _ = ports.send(port);
        }
        // Keep draining after the consumer left so the child never blocks on a full pipe
        if !consumer_gone && output.send(text).await.is_err() {
            consumer_gone = true;
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        for port in scanner.feed(&rest) {
            let _ = ports.send(port);
        }
        if !consumer_gone {
            let _ = output.send(rest).await;
        }
    }
    if let Some(port) = scanner.finish() {
        let _ = ports.send(port);
    }
}
