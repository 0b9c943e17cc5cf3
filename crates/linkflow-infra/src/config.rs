//! Engine configuration loader.
//!
//! Reads `linkflow.toml` from the data directory (`~/.linkflow/` by default)
//! into [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a broken config never stops the engine from starting.

use std::path::{Path, PathBuf};

use linkflow_types::config::EngineConfig;

use crate::sqlite::pool::default_database_url;

/// File name of the engine configuration inside the data directory.
pub const CONFIG_FILE: &str = "linkflow.toml";

const DATA_DIR_ENV: &str = "LINKFLOW_DATA_DIR";

/// `LINKFLOW_DATA_DIR`, else `~/.linkflow`, else `./.linkflow`.
pub fn default_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".linkflow"),
    }
}

/// Load `{data_dir}/linkflow.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: a warning, then defaults.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}

/// The configured database URL, or the default one under `data_dir`.
pub fn resolve_database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config
        .storage
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
