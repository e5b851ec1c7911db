//! Common command-line arguments for all mbsrv binaries
//!
//! Provides a unified argument structure that individual binaries flatten
//! into their own `clap` parsers.

use std::path::PathBuf;

use clap::Args;

use crate::logging::{resolve_log_root, LogConfig, LogFormat};

/// Common startup arguments
///
/// These arguments are shared by every binary and provide standard options
/// for logging and configuration.
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "MBSRV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to a daily rolling file
    #[arg(long)]
    pub log_file: bool,

    /// Directory for log files (overridden by MBSRV_LOG_DIR)
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Write file logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Disable colored output (useful for log files)
    #[arg(long)]
    pub no_color: bool,

    /// Only validate configuration without starting
    #[arg(long)]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            log_file: false,
            log_dir: None,
            json_logs: false,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Build the logger configuration for `service_name`
    pub fn log_config(&self, service_name: &str) -> LogConfig {
        LogConfig {
            service_name: service_name.to_string(),
            log_dir: resolve_log_root(self.log_dir.as_deref()),
            level: self.parse_log_level(),
            log_to_file: self.log_file,
            file_format: if self.json_logs {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
            ansi: !self.no_color,
        }
    }
}
