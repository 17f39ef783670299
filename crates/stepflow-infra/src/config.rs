//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.stepflow/` unless
//! `STEPFLOW_DATA_DIR` says otherwise) into [`EngineConfig`]. A missing or
//! malformed file yields the defaults.

use std::path::{Path, PathBuf};

use stepflow_types::config::EngineConfig;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "STEPFLOW_DATA_DIR";

/// Resolve the data directory: `$STEPFLOW_DATA_DIR`, else `~/.stepflow`,
/// else `./.stepflow` when no home directory is known.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stepflow"),
    }
}

/// Load engine configuration from `{data_dir}/config.toml`.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml found, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            EngineConfig::default()
        }
    }
}
