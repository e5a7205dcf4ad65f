//! Cache command - Inspect and clear cached file content
//!
//! `clear` only evicts files the remote store knows about. Files whose
//! creation was never confirmed exist nowhere else and are kept.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use tracing::{info, warn};

use mirrorleaf_cache::SqliteContentStore;
use mirrorleaf_core::config::Config;
use mirrorleaf_core::domain::Identifier;
use mirrorleaf_core::ports::IContentStore;

use crate::commands::open_database;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached files
    List,
    /// Evict every cached file that exists remotely
    Clear,
}

/// Summary of one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedFileRow {
    pub file_id: String,
    pub path: String,
    pub bytes: usize,
    pub encoding: &'static str,
    /// Content still equals what was last read from or written to the store
    pub synced: bool,
    pub unconfirmed: bool,
    pub cached_at: DateTime<Utc>,
}

impl CacheCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let db = open_database(config).await?;
        let store = SqliteContentStore::new(db.pool().clone());

        let result = match self {
            CacheCommand::List => list(&store, format).await,
            CacheCommand::Clear => clear(&store, format).await,
        };
        db.close().await;
        result
    }
}

async fn list(store: &dyn IContentStore, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let rows = collect_rows(store).await?;

    if format.is_json() {
        formatter.print_json(&serde_json::to_value(&rows).context("Failed to serialize rows")?);
        return Ok(());
    }
    if rows.is_empty() {
        formatter.info("Cache is empty");
        return Ok(());
    }

    formatter.success(&format!("{} cached files", rows.len()));
    for row in &rows {
        let state = match (row.unconfirmed, row.synced) {
            (true, _) => "unconfirmed",
            (false, true) => "synced",
            (false, false) => "modified",
        };
        formatter.info(&format!(
            "{:<12} {:>8} B  {}  {}",
            state, row.bytes, row.path, row.file_id
        ));
    }
    Ok(())
}

async fn clear(store: &dyn IContentStore, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let (removed, kept) = evict_confirmed(store).await?;

    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "removed": removed,
            "kept_unconfirmed": kept,
        }));
    } else {
        formatter.success(&format!("Removed {removed} cached files"));
        if kept > 0 {
            formatter.info(&format!("Kept {kept} unconfirmed files"));
        }
    }
    Ok(())
}

async fn collect_rows(store: &dyn IContentStore) -> Result<Vec<CachedFileRow>> {
    let ids = store
        .list_all_ids()
        .await
        .context("Failed to list cached files")?;

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(entry) = store.get(&id).await? else {
            continue;
        };
        rows.push(CachedFileRow {
            file_id: id.to_string(),
            path: entry.path.to_string(),
            bytes: entry.content.len(),
            encoding: entry.content.encoding().as_str(),
            synced: entry.baseline_checksum.as_ref() == Some(&entry.checksum),
            unconfirmed: id.is_temp(),
            cached_at: entry.cached_at,
        });
    }
    Ok(rows)
}

/// Deletes the entries of real ids; returns (removed, kept) counts
async fn evict_confirmed(store: &dyn IContentStore) -> Result<(usize, usize)> {
    let ids = store
        .list_all_ids()
        .await
        .context("Failed to list cached files")?;

    let (real, temp): (Vec<Identifier>, Vec<Identifier>) =
        ids.into_iter().partition(Identifier::is_real);

    let mut removed = 0;
    for id in &real {
        match store.delete(id).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(file_id = %id, error = %e, "Could not evict cache entry"),
        }
    }
    info!(removed, kept = temp.len(), "Cache cleared");
    Ok((removed, temp.len()))
}
