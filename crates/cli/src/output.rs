// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text (tables, colors, etc.).
    Human,
    /// Machine-readable JSON (one object per response).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
///
/// - `Human`: calls `human_fn` to produce a human-readable string.
/// - `Json`: serializes `value` as JSON.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Human => {
            writeln!(out, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut out, value).map_err(io::Error::other)?;
            writeln!(out)
        }
    }
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line =
                render_human_stderr_line("error", message, io::stderr().is_terminal(), ANSI_RED);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if lower.contains("conflict is pending") {
        return (
            "CONFLICT_PENDING",
            "Both a local and a drive copy exist. Run: storyverse resolve keep-local|keep-remote"
                .to_string(),
        );
    }

    if lower.contains("permission to") && lower.contains("denied") {
        let path = lower
            .find("permission to")
            .and_then(|at| extract_backticked(&message[at..]))
            .unwrap_or_else(|| "<file>".to_string());
        return (
            "PERMISSION_DENIED",
            format!("Cannot write {path}. Check the file permissions, or open the project again."),
        );
    }

    if lower.contains("not signed in") || lower.contains("unauthorized") {
        return (
            "AUTH_FAILURE",
            "Drive session expired. Run: storyverse drive sign-in --access-token <token>".to_string(),
        );
    }

    if lower.contains("transport error") || lower.contains("timed out") {
        return (
            "NETWORK_ERROR",
            format!("Could not reach the drive. Your edits are kept locally until the next save. ({message})"),
        );
    }

    if lower.contains("no project is open") {
        return (
            "NO_PROJECT",
            "No project is open. Run: storyverse new <name> --file <path>".to_string(),
        );
    }

    ("ERROR", message)
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}

fn extract_backticked(message: &str) -> Option<String> {
    let mut parts = message.split('`');
    let _before = parts.next()?;
    let candidate = parts.next()?.trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Saved {
        name: String,
        words: u64,
    }

    fn saved() -> Saved {
        Saved { name: "my saga".into(), words: 1200 }
    }

    #[test]
    fn detect_follows_the_terminal_unless_json_is_forced() {
        assert_eq!(OutputFormat::detect_from_terminal(true), OutputFormat::Human);
        assert_eq!(OutputFormat::detect_from_terminal(false), OutputFormat::Json);
        assert_eq!(OutputFormat::detect(true), OutputFormat::Json);
    }

    #[test]
    fn write_output_human_format() {
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Human, &saved(), |s| format!("{}: {} words", s.name, s.words))
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "my saga: 1200 words\n");
    }

    #[test]
    fn write_output_json_is_one_line_and_skips_human_fn() {
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Json, &saved(), |_| {
            unreachable!("human_fn should not be called in JSON mode")
        })
        .unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with('\n'));
        assert_eq!(output.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed["name"], "my saga");
        assert_eq!(parsed["words"], 1200);
    }

    #[test]
    fn stderr_line_is_colored_only_on_a_tty() {
        let line = render_human_stderr_line("error", "boom", true, ANSI_RED);
        assert!(line.starts_with(ANSI_RED));
        assert!(line.contains(ANSI_RESET));
        assert_eq!(render_human_stderr_line("error", "boom", false, ANSI_RED), "error: boom");
    }

    #[test]
    fn actionable_error_permission_names_the_file() {
        let err = anyhow::anyhow!("permission to `/home/ana/saga.json` was denied")
            .context("failed to create project `Saga`");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "PERMISSION_DENIED");
        assert!(message.contains("/home/ana/saga.json"));
    }

    #[test]
    fn actionable_error_auth_points_at_sign_in() {
        let err = anyhow::anyhow!("not signed in to the drive");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "AUTH_FAILURE");
        assert!(message.contains("storyverse drive sign-in"));
    }

    #[test]
    fn actionable_error_conflict_points_at_resolve() {
        let err = anyhow::anyhow!(
            "a local/drive conflict is pending. Run: storyverse resolve keep-local|keep-remote"
        );
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "CONFLICT_PENDING");
        assert!(message.contains("storyverse resolve"));
    }

    #[test]
    fn actionable_error_network_keeps_the_cause() {
        let err = anyhow::anyhow!("drive transport error: dns error");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "NETWORK_ERROR");
        assert!(message.contains("dns error"));
    }

    #[test]
    fn actionable_error_falls_back_to_the_full_chain() {
        let err = anyhow::anyhow!("disk full").context("failed to import `draft.json`");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "ERROR");
        assert_eq!(message, "failed to import `draft.json`: disk full");
    }
}
