//! Layered configuration loading
//!
//! Every binary in the workspace resolves its configuration the same way.
//! Priority (highest to lowest):
//! 1. Environment variables (prefixed, nested keys separated by `__`)
//! 2. Configuration file (YAML, TOML or JSON, chosen by extension)
//! 3. Compiled-in defaults

use std::path::Path;

use errors::{ServiceError, ServiceResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a configuration comes from
#[derive(Debug, Clone, Copy)]
pub struct ConfigSource<'a> {
    /// Optional configuration file; when given it must exist
    pub file: Option<&'a Path>,
    /// Environment prefix, e.g. `MBSRV_`
    pub env_prefix: &'a str,
}

impl<'a> ConfigSource<'a> {
    pub fn new(file: Option<&'a Path>, env_prefix: &'a str) -> Self {
        Self { file, env_prefix }
    }
}

/// Load `T` from defaults, an optional file and prefixed environment variables
pub fn load_layered<T>(source: ConfigSource<'_>) -> ServiceResult<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = source.file {
        figment = merge_file(figment, path)?;
    }

    figment = figment.merge(Env::prefixed(source.env_prefix).split("__"));

    figment
        .extract()
        .map_err(|e| ServiceError::Configuration(format!("Failed to load configuration: {}", e)))
}

fn merge_file(figment: Figment, path: &Path) -> ServiceResult<Figment> {
    if !path.exists() {
        return Err(ServiceError::Configuration(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ServiceError::Configuration("Config file must have an extension".into()))?;

    debug!("Loading configuration file {}", path.display());

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        _ => Err(ServiceError::Configuration(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}
