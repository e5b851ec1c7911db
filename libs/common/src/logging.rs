//! Unified logging module for mbsrv services and tools
//!
//! Console output always uses the bracketed level format; a daily rolling
//! file sink is added when the service asks for one.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use errors::{ServiceError, ServiceResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable that overrides the log root directory
pub const LOG_DIR_ENV: &str = "MBSRV_LOG_DIR";

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Listening on 0.0.0.0:502`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Get log root directory
///
/// Priority: `MBSRV_LOG_DIR` env > `configured` > `logs`
pub fn resolve_log_root(configured: Option<&str>) -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            configured
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
}

/// File sink format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `timestamp [LEVEL] message`
    Text,
    /// One JSON object per event
    Json,
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "mbsrv", "churn"); also the log file prefix
    pub service_name: String,
    /// Directory for the rolling file sink
    pub log_dir: PathBuf,
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Write a daily rolling file in addition to the console
    pub log_to_file: bool,
    /// File sink format
    pub file_format: LogFormat,
    /// Emit ANSI colors on the console
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: resolve_log_root(None),
            level: Level::INFO,
            log_to_file: false,
            file_format: LogFormat::Text,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Filter directive used when `RUST_LOG` is absent
    ///
    /// Our own crates log at the requested level, everything else stays at
    /// `warn` so dependency chatter does not drown protocol traces.
    pub fn default_directive(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        format!(
            "warn,{}={},mbsrv={},common={}",
            self.service_name, level, level, level
        )
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> ServiceResult<()> {
    let directive =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.default_directive());
    let env_filter = EnvFilter::try_new(&directive)
        .map_err(|e| ServiceError::Configuration(format!("Invalid log filter '{}': {}", directive, e)))?;

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.log_to_file {
        std::fs::create_dir_all(&config.log_dir)?;

        let appender = tracing_appender::rolling::daily(
            &config.log_dir,
            format!("{}.log", config.service_name),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
        match guards.lock() {
            Ok(mut guards) => guards.push(guard),
            Err(poisoned) => poisoned.into_inner().push(guard),
        }

        let layer = match config.file_format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed(),
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ServiceError::Internal(format!("Logging already initialized: {}", e)))?;

    if config.log_to_file {
        tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    }

    Ok(())
}
