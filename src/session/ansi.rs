use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// OSC strings (`ESC ] ... BEL|ESC \`), CSI sequences (`ESC [ params final`,
/// or the 8-bit `0x9B` introducer) and two-byte escapes (`ESC (B`, `ESC =`).
static CONTROL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|(?:\x1b\[|\x9b)[0-?]*[ -/]*[@-~]|\x1b[ -/]*[0-~]",
    )
    .expect("control sequence pattern is valid")
});

/// Remove terminal control sequences from a chunk of process output.
///
/// Stateless: a sequence split across two chunks is only partially removed.
pub fn strip_control_sequences(chunk: &str) -> Cow<'_, str> {
    CONTROL_SEQUENCE.replace_all(chunk, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_color_codes() {
        assert_eq!(strip_control_sequences("\u{1b}[32mOK\u{1b}[0m\n"), "OK\n");
    }

    #[test]
    fn test_strips_cursor_movement_and_line_clear() {
        assert_eq!(
            strip_control_sequences("\u{1b}[1G\u{1b}[0K⠙\u{1b}[?25l\u{1b}[2Kdone"),
            "⠙done"
        );
    }

    #[test]
    fn test_strips_osc_titles_and_charset_switches() {
        assert_eq!(
            strip_control_sequences("\u{1b}]0;npm install\u{7}added\u{1b}(B 1\u{1b}]8;;\u{1b}\\"),
            "added 1"
        );
    }

    #[test]
    fn test_plain_text_is_borrowed() {
        let text = "added 1 package in 2s\n";
        assert!(matches!(strip_control_sequences(text), Cow::Borrowed(_)));
    }

    #[test]
    fn test_split_sequence_is_best_effort() {
        // A dangling introducer is dropped; its parameters in the next chunk survive
        let first = strip_control_sequences("ready\u{1b}[");
        let second = strip_control_sequences("32mOK");
        assert_eq!(first, "ready");
        assert_eq!(second, "32mOK");
    }
}
