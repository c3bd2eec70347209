//! Logging and tracing utilities
//!
//! Tracing subscriber initialization with JSON (production) or pretty
//! (development) formatting, plus sanitization for respondent-supplied
//! values (slugs, user agents, referers) before they reach the log stream.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum length for sanitized log values to prevent log flooding
const MAX_LOG_LENGTH: usize = 500;

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to debug for this crate, warn for sqlx.
/// Production gets JSON lines, everything else gets the human format.
pub fn init_tracing(json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "survey_runtime=debug,tower_http=debug,axum=trace,sqlx=warn".into()
    });

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// Sanitize a respondent-supplied string for safe logging.
///
/// Replaces CR/LF and ASCII control characters with spaces and truncates to
/// a bounded length so forged entries and flooding are off the table.
pub fn sanitize_log_value(value: &str) -> String {
    let mut out: String = value
        .chars()
        .map(|c| {
            if c.is_control() || c == '\u{2028}' || c == '\u{2029}' {
                ' '
            } else {
                c
            }
        })
        .collect();
    if out.len() > MAX_LOG_LENGTH {
        out.truncate(MAX_LOG_LENGTH);
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_newlines_and_controls() {
        assert_eq!(sanitize_log_value("user\ninput"), "user input");
        assert_eq!(sanitize_log_value("tab\there"), "tab here");
        assert_eq!(sanitize_log_value("null\x00byte"), "null byte");
    }

    #[test]
    fn truncates_long_values() {
        let long = "a".repeat(1000);
        let sanitized = sanitize_log_value(&long);
        assert!(sanitized.len() <= MAX_LOG_LENGTH + 3);
        assert!(sanitized.ends_with("..."));
    }
}
