//! Wiring: turn an [`EngineConfig`] into a SQLite-backed checkpoint manager
//! and engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use linkflow_core::executor::WorkflowEngine;
use linkflow_core::state::{CheckpointManager, PayloadCipher, PayloadPipeline};
use linkflow_types::config::EngineConfig;

use crate::config::{default_data_dir, resolve_database_url};
use crate::crypto::vault::VaultCipher;
use crate::keys::KeyProvider;
use crate::sqlite::{DatabasePool, SqliteStateStore};

/// Open the configured database and build a checkpoint manager over it.
///
/// `keys` feeds the payload cipher. With encryption enabled the active key
/// must resolve (or be creatable) now, not at the first checkpoint. With
/// encryption disabled the keys are still used to read older encrypted
/// checkpoints.
pub async fn build_checkpoint_manager(
    config: &EngineConfig,
    keys: Vec<Box<dyn KeyProvider>>,
) -> anyhow::Result<CheckpointManager<SqliteStateStore>> {
    let database_url = match &config.storage.database_url {
        Some(url) => url.clone(),
        None => {
            let data_dir = default_data_dir();
            ensure_data_dir(&data_dir).await?;
            resolve_database_url(config, &data_dir)
        }
    };
    build_checkpoint_manager_at(config, &database_url, keys).await
}

/// Like [`build_checkpoint_manager`], with an explicit database URL.
pub async fn build_checkpoint_manager_at(
    config: &EngineConfig,
    database_url: &str,
    keys: Vec<Box<dyn KeyProvider>>,
) -> anyhow::Result<CheckpointManager<SqliteStateStore>> {
    let encryption = &config.checkpoint.encryption;

    let cipher: Option<Arc<dyn PayloadCipher>> = if keys.is_empty() {
        if encryption.enabled {
            bail!(
                "checkpoint encryption is enabled (key id '{}') but no key providers are configured",
                encryption.key_id
            );
        }
        None
    } else {
        let cipher = VaultCipher::new(keys);
        if encryption.enabled {
            cipher
                .encrypt(&encryption.key_id, b"")
                .with_context(|| format!("checkpoint key '{}' is not usable", encryption.key_id))?;
        }
        Some(Arc::new(cipher))
    };

    let pool = DatabasePool::new(database_url)
        .await
        .context("failed to open checkpoint database")?;

    let pipeline = PayloadPipeline::from_config(&config.checkpoint, cipher);
    tracing::info!(
        stages = ?pipeline.stage_names(),
        compression = config.checkpoint.compression.enabled,
        encryption = encryption.enabled,
        retain_versions = ?config.checkpoint.retain_versions,
        "checkpoint manager ready"
    );

    Ok(CheckpointManager::new(SqliteStateStore::new(pool))
        .with_pipeline(pipeline)
        .with_retained_versions(config.checkpoint.retain_versions))
}

/// A workflow engine over a SQLite checkpoint manager. Blocks and guards are
/// registered on the returned engine.
pub async fn build_engine(
    config: EngineConfig,
    keys: Vec<Box<dyn KeyProvider>>,
) -> anyhow::Result<WorkflowEngine<SqliteStateStore>> {
    let checkpoints = build_checkpoint_manager(&config, keys).await?;
    Ok(WorkflowEngine::new(Arc::new(checkpoints), config))
}

/// Create `data_dir` and its parents if missing.
pub async fn ensure_data_dir(data_dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))
}
