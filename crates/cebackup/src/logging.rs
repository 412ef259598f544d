//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used when neither flags nor config choose one
pub const DEFAULT_LOG_LEVEL: &str = "warning";

/// Where and how verbosely to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Combine flags and config: a flag level beats the config level, and
    /// `log_stdout` discards any log file.
    pub fn resolve(
        flag_level: Option<&str>,
        config_level: Option<&str>,
        flag_file: Option<&Path>,
        config_file: Option<&Path>,
        log_stdout: bool,
    ) -> Self {
        let level = flag_level
            .or(config_level)
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .to_string();
        let file = if log_stdout {
            None
        } else {
            flag_file.or(config_file).map(Path::to_path_buf)
        };
        Self { level, file }
    }

    pub fn is_debug(&self) -> bool {
        filter_directive(&self.level) == "debug"
    }
}

/// Map a configured level name onto a tracing filter directive.
pub fn filter_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "warn",
    }
}

/// Install the global subscriber. Log files are opened for appending.
pub fn init_tracing(settings: &LogSettings) -> io::Result<()> {
    let filter = EnvFilter::new(filter_directive(&settings.level));
    let debug = settings.is_debug();

    let layer = fmt::layer()
        .with_target(debug)
        .with_file(debug)
        .with_line_number(debug);

    let layer = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            layer
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed()
        }
        None => layer.with_writer(io::stdout).boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
    Ok(())
}
