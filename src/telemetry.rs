use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn tracing_log_path() -> PathBuf {
    env::var("SWITCH_LISTENER_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("switch_listener_trace.jsonl"))
}

fn file_logging_enabled(config: &AppConfig) -> bool {
    config.logs && !config.no_logs
}

fn console_level(config: &AppConfig) -> Level {
    Level::from_str(&config.log_level).unwrap_or(Level::WARN)
}

/// Install the global subscriber once: JSON lines to the trace file when
/// `--logs` is on, otherwise compact lines on stderr at `--log-level`.
pub fn init_tracing(config: &AppConfig) {
    let _ = TRACING_INIT.get_or_init(|| {
        if file_logging_enabled(config) {
            let path = tracing_log_path();
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    let subscriber = tracing_subscriber::fmt()
                        .json()
                        .with_timer(UtcTime::rfc_3339())
                        .with_max_level(Level::DEBUG)
                        .with_writer(file)
                        .with_current_span(false)
                        .with_span_list(false)
                        .finish();
                    let _ = tracing::subscriber::set_global_default(subscriber);
                    return;
                }
                Err(err) => eprintln!("failed to open trace log {}: {err}", path.display()),
            }
        }

        let subscriber = tracing_subscriber::fmt()
            .compact()
            .with_target(false)
            .with_max_level(console_level(config))
            .with_writer(std::io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn no_logs_overrides_logs() {
        let cfg = AppConfig::parse_from(["test-app", "--logs"]);
        assert!(file_logging_enabled(&cfg));
        let cfg = AppConfig::parse_from(["test-app", "--logs", "--no-logs"]);
        assert!(!file_logging_enabled(&cfg));
        let cfg = AppConfig::parse_from(["test-app"]);
        assert!(!file_logging_enabled(&cfg));
    }

    #[test]
    fn console_level_follows_log_level_flag() {
        let cfg = AppConfig::parse_from(["test-app", "--log-level", "debug"]);
        assert_eq!(console_level(&cfg), Level::DEBUG);
        let mut cfg = AppConfig::parse_from(["test-app"]);
        assert_eq!(console_level(&cfg), Level::WARN);
        cfg.log_level = "nonsense".to_string();
        assert_eq!(console_level(&cfg), Level::WARN);
    }
}
