//! Shared bootstrap library for mbsrv services and tools
//!
//! Provides the functions every binary in the workspace needs before it can
//! do real work:
//! - logging initialization
//! - layered configuration loading
//! - shutdown signal handling
//! - shared command-line arguments

#[cfg(feature = "cli")]
pub mod bootstrap_args;

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_layered, ConfigSource};
pub use logging::{LogConfig, LogFormat};
pub use shutdown::wait_for_shutdown;
