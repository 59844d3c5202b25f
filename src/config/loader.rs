//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{AlphaError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with ALPHA__, e.g. ALPHA__EXCHANGE__API_KEY)
/// 2. Configuration file (TOML format)
/// 3. Default values
///
/// The result is validated; any problem is reported as a configuration error.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("ALPHA")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("stream.assets"),
    );

    let config = builder
        .build()
        .map_err(|e| AlphaError::Configuration(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| AlphaError::Configuration(e.to_string()))?;

    app_config.validate()?;
    Ok(app_config)
}

/// Parse configuration from a TOML string (no environment overrides)
pub fn load_from_str(toml: &str) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(toml, config::FileFormat::Toml))
        .build()
        .map_err(|e| AlphaError::Configuration(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| AlphaError::Configuration(e.to_string()))?;

    app_config.validate()?;
    Ok(app_config)
}
