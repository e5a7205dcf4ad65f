//! Tree command - Render the folder hierarchy of a snapshot
//!
//! Without `--snapshot` the tree comes from the stored sync snapshot of the
//! configured root folder, plus any unconfirmed files still in the cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use mirrorleaf_cache::{SqliteContentStore, SqliteSyncMetaStore};
use mirrorleaf_core::config::Config;
use mirrorleaf_core::domain::{build_tree, Content, FileMeta, Identifier, RemoteSnapshot, TreeNode};
use mirrorleaf_core::ports::{IContentStore, ISyncMetaStore};

use crate::commands::open_database;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, clap::Args)]
pub struct TreeCommand {
    /// Render this snapshot JSON file instead of the stored snapshot
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

impl TreeCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let files = match &self.snapshot {
            Some(path) => {
                info!(snapshot = %path.display(), "Rendering snapshot file");
                snapshot_files(&read_snapshot(path)?)
            }
            None => stored_files(config).await?,
        };
        let tree = build_tree(&files);

        if format.is_json() {
            let json = serde_json::json!({
                "files": files.len(),
                "tree": tree,
            });
            formatter.print_json(&json);
        } else if tree.is_empty() {
            formatter.info("No files");
        } else {
            formatter.success(&format!("{} files", files.len()));
            for line in render(&tree) {
                formatter.info(&line);
            }
        }
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<RemoteSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid snapshot {}", path.display()))
}

fn snapshot_files(snapshot: &RemoteSnapshot) -> BTreeMap<Identifier, FileMeta> {
    snapshot
        .files
        .iter()
        .map(|(id, meta)| (Identifier::Real(id.clone()), meta.to_file_meta()))
        .collect()
}

async fn stored_files(config: &Config) -> Result<BTreeMap<Identifier, FileMeta>> {
    let db = open_database(config).await?;
    let meta = SqliteSyncMetaStore::new(db.pool().clone());
    let content = SqliteContentStore::new(db.pool().clone());

    let mut files: BTreeMap<Identifier, FileMeta> = meta
        .load(&config.store.root_folder_id)
        .await
        .context("Failed to load sync snapshot")?
        .map(|snapshot| {
            snapshot
                .files
                .iter()
                .map(|(id, meta)| (Identifier::Real(id.clone()), meta.to_file_meta()))
                .collect()
        })
        .unwrap_or_default();

    let cached = content
        .list_all_ids()
        .await
        .context("Failed to list cached files")?;
    for id in cached.into_iter().filter(Identifier::is_temp) {
        if let Some(entry) = content.get(&id).await? {
            let mime_type = match entry.content {
                Content::Text(_) => "text/plain",
                Content::Binary(_) => "application/octet-stream",
            };
            files.insert(id, FileMeta::new(entry.path, mime_type));
        }
    }

    debug!(files = files.len(), "Loaded stored tree");
    db.close().await;
    Ok(files)
}

/// One line per node, two spaces of indentation per level
fn render(nodes: &[TreeNode]) -> Vec<String> {
    fn walk(nodes: &[TreeNode], depth: usize, lines: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        for node in nodes {
            match node {
                TreeNode::Folder { name, children, .. } => {
                    lines.push(format!("{indent}{name}/"));
                    walk(children, depth + 1, lines);
                }
                TreeNode::File { id, name, .. } if id.is_temp() => {
                    lines.push(format!("{indent}{name} (unconfirmed)"));
                }
                TreeNode::File { name, .. } => lines.push(format!("{indent}{name}")),
            }
        }
    }

    let mut lines = Vec::new();
    walk(nodes, 0, &mut lines);
    lines
}
