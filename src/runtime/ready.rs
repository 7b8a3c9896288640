use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::runtime::traits::ServerReady;
use crate::session::strip_control_sequences;

/// Log patterns dev servers print once they are listening.
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // "App is live at http://localhost:3111", "Local: http://127.0.0.1:5173/"
        r"(?i)https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})\b",
        // "Server listening on port 3000", "running on port: 8080"
        r"(?i)\b(?:listening|running|started|live|ready)\b.*?\bport\b\s*:?\s*(\d{2,5})\b",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Extract the port a server announced in a single log line.
pub fn detect_port(line: &str) -> Option<u16> {
    let line = strip_control_sequences(line);
    PORT_PATTERNS.iter().find_map(|regex| {
        regex
            .captures(&line)
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|port| *port != 0)
    })
}

/// Reassembles lines from output chunks and reports announced ports.
#[derive(Debug, Default)]
pub struct LineScanner {
    partial: String,
}

impl LineScanner {
    /// Feed a chunk; returns ports found in every line it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<u16> {
        self.partial.push_str(chunk);

        let mut ports = Vec::new();
        while let Some(pos) = self.partial.find(['\n', '\r']) {
            let line: String = self.partial.drain(..=pos).collect();
            if let Some(port) = detect_port(&line) {
                ports.push(port);
            }
        }
        ports
    }

    /// Scan whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<u16> {
        let line = std::mem::take(&mut self.partial);
        detect_port(&line)
    }
}

/// Fan-out of readiness events to every registered listener.
#[derive(Clone, Default)]
pub struct ReadyListeners {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<ServerReady>>>>,
}

impl ReadyListeners {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerReady> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to all live listeners, returning how many received it.
    pub fn announce(&self, event: ServerReady) -> usize {
        let mut senders = self.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(port = event.port, url = %event.url, listeners = senders.len(), "Server ready");
        senders.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ServerReady>>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_server_banners() {
        assert_eq!(detect_port("App is live at http://localhost:3111"), Some(3111));
        assert_eq!(detect_port("  ➜  Local:   http://127.0.0.1:5173/"), Some(5173));
        assert_eq!(detect_port("Server listening on port 8080"), Some(8080));
        assert_eq!(detect_port("Express running on port: 4000"), Some(4000));
        assert_eq!(
            detect_port("\u{1b}[32mready\u{1b}[0m - started server on port 3000"),
            Some(3000)
        );
    }

    #[test]
    fn test_ignores_unrelated_lines() {
        assert_eq!(detect_port("added 1 package in 2s"), None);
        assert_eq!(detect_port("[nodemon] watching path(s): *.*"), None);
        assert_eq!(detect_port("see https://example.com:443/docs"), None);
    }

    #[test]
    fn test_scanner_joins_split_lines() {
        let mut scanner = LineScanner::default();
        assert!(scanner.feed("App is live at http://loc").is_empty());
        assert_eq!(scanner.feed("alhost:3111\nnext"), vec![3111]);
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn test_scanner_reports_trailing_line_on_finish() {
        let mut scanner = LineScanner::default();
        assert!(scanner.feed("listening on port 9000").is_empty());
        assert_eq!(scanner.finish(), Some(9000));
    }

    #[tokio::test]
    async fn test_listeners_receive_every_announcement() {
        let listeners = ReadyListeners::default();
        let mut first = listeners.subscribe();
        let mut second = listeners.subscribe();

        let event = ServerReady {
            port: 3111,
            url: "http://localhost:3111".to_string(),
        };
        assert_eq!(listeners.announce(event.clone()), 2);

        assert_eq!(first.recv().await, Some(event.clone()));
        assert_eq!(second.recv().await, Some(event.clone()));

        drop(second);
        assert_eq!(listeners.announce(event), 1);
    }
}
