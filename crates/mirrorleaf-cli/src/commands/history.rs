//! History command - Show the edit timeline of one file

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mirrorleaf_cache::SqliteHistoryStore;
use mirrorleaf_core::config::Config;
use mirrorleaf_core::domain::Identifier;
use mirrorleaf_history::{EditHistoryTracker, TimelineEntry};

use crate::commands::open_database;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, clap::Args)]
pub struct HistoryCommand {
    /// File identifier: a remote id, or `new:<path>` for an unconfirmed file
    pub file_id: String,
}

impl HistoryCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let id: Identifier = self
            .file_id
            .parse()
            .with_context(|| format!("Invalid file identifier '{}'", self.file_id))?;

        let db = open_database(config).await?;
        let store = Arc::new(SqliteHistoryStore::new(db.pool().clone()));
        let tracker = EditHistoryTracker::from_config(store, &config.history);
        let rows = tracker
            .timeline(&id)
            .await
            .with_context(|| format!("Failed to load history of {id}"))?;
        db.close().await;

        info!(file_id = %id, entries = rows.len(), "Showing history");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "file_id": id.to_string(),
                "entries": rows,
            }));
        } else if rows.is_empty() {
            formatter.info(&format!("No history recorded for {id}"));
        } else {
            formatter.success(&format!("{} history entries for {id}", rows.len()));
            for row in &rows {
                formatter.info(&format_row(row));
            }
        }
        Ok(())
    }
}

fn format_row(row: &TimelineEntry) -> String {
    let mut line = format!(
        "{:<6} #{:<3} {}  +{} -{}",
        row.origin.as_str(),
        row.index,
        row.timestamp.format("%Y-%m-%d %H:%M:%S"),
        row.additions,
        row.deletions
    );
    if let Some(revision) = &row.revision_id {
        line.push_str(&format!("  rev {revision}"));
    }
    if !row.restorable {
        line.push_str("  (no changes)");
    }
    line
}
