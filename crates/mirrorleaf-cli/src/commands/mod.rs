pub mod cache;
pub mod completions;
pub mod config;
pub mod history;
pub mod tree;

use anyhow::{Context, Result};

use mirrorleaf_cache::DatabasePool;
use mirrorleaf_core::config::Config;

/// Opens the configured replica database
pub(crate) async fn open_database(config: &Config) -> Result<DatabasePool> {
    DatabasePool::from_config(&config.cache)
        .await
        .with_context(|| {
            format!(
                "Failed to open database at {}",
                config.cache.database.display()
            )
        })
}
