//! Folder hierarchy derived from a flat file list
//!
//! The remote store only knows files; folders are inferred from the
//! `/`-delimited names. [`build_tree`] is a pure function of its input map,
//! so re-deriving the tree after every change is how the hierarchy stays
//! consistent with the file list.
//!
//! Sibling ordering is total: folders before files, then case-sensitive
//! lexicographic by name, then by the textual identifier.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FilePath, Identifier};

/// Tree-facing metadata of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Full canonical path of the file
    pub name: FilePath,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
}

impl FileMeta {
    #[must_use]
    pub fn new(name: FilePath, mime_type: impl Into<String>) -> Self {
        Self {
            name,
            mime_type: mime_type.into(),
            modified_time: None,
        }
    }
}

/// A node of the derived tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    File {
        id: Identifier,
        /// Last path segment
        name: String,
        mime_type: String,
        modified_time: Option<DateTime<Utc>>,
    },
    Folder {
        /// Always `Identifier::Virtual`
        id: Identifier,
        name: String,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    #[must_use]
    pub fn id(&self) -> &Identifier {
        match self {
            TreeNode::File { id, .. } | TreeNode::Folder { id, .. } => id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            TreeNode::File { name, .. } | TreeNode::Folder { name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        matches!(self, TreeNode::Folder { .. })
    }

    #[must_use]
    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Folder { children, .. } => children,
            TreeNode::File { .. } => &[],
        }
    }

    fn sort_key_cmp(&self, other: &TreeNode) -> Ordering {
        other
            .is_folder()
            .cmp(&self.is_folder())
            .then_with(|| self.name().cmp(other.name()))
            .then_with(|| self.id().to_string().cmp(&other.id().to_string()))
    }
}

#[derive(Default)]
struct FolderBuilder {
    folders: BTreeMap<String, FolderBuilder>,
    files: Vec<TreeNode>,
}

impl FolderBuilder {
    fn into_nodes(self, path: Option<&FilePath>) -> Vec<TreeNode> {
        let mut nodes: Vec<TreeNode> = Vec::with_capacity(self.folders.len() + self.files.len());
        for (name, builder) in self.folders {
            let folder_path = match FilePath::from_parent(path, &name) {
                Ok(p) => p,
                // Segments come from validated paths
                Err(_) => continue,
            };
            let children = builder.into_nodes(Some(&folder_path));
            nodes.push(TreeNode::Folder {
                id: Identifier::virtual_folder(folder_path),
                name,
                children,
            });
        }
        nodes.extend(self.files);
        nodes.sort_by(TreeNode::sort_key_cmp);
        nodes
    }
}

/// Build the ordered forest for a flat file map
#[must_use]
pub fn build_tree(files: &BTreeMap<Identifier, FileMeta>) -> Vec<TreeNode> {
    let mut root = FolderBuilder::default();

    for (id, meta) in files {
        let segments: Vec<&str> = meta.name.segments().collect();
        let Some((leaf, folders)) = segments.split_last() else {
            continue;
        };

        let mut current = &mut root;
        for segment in folders {
            current = current.folders.entry((*segment).to_string()).or_default();
        }
        current.files.push(TreeNode::File {
            id: id.clone(),
            name: (*leaf).to_string(),
            mime_type: meta.mime_type.clone(),
            modified_time: meta.modified_time,
        });
    }

    root.into_nodes(None)
}

/// Find a node anywhere in the forest
#[must_use]
pub fn find<'a>(tree: &'a [TreeNode], id: &Identifier) -> Option<&'a TreeNode> {
    for node in tree {
        if node.id() == id {
            return Some(node);
        }
        if let Some(found) = find(node.children(), id) {
            return Some(found);
        }
    }
    None
}

/// Path of a node reconstructed from the names of its ancestors
#[must_use]
pub fn path_of(tree: &[TreeNode], id: &Identifier) -> Option<FilePath> {
    fn walk(nodes: &[TreeNode], id: &Identifier, prefix: &mut Vec<String>) -> bool {
        for node in nodes {
            prefix.push(node.name().to_string());
            if node.id() == id || walk(node.children(), id, prefix) {
                return true;
            }
            prefix.pop();
        }
        false
    }

    let mut segments = Vec::new();
    if walk(tree, id, &mut segments) {
        FilePath::new(segments.join("/")).ok()
    } else {
        None
    }
}

/// Identifiers of every file located under a folder path
#[must_use]
pub fn files_under(files: &BTreeMap<Identifier, FileMeta>, folder: &FilePath) -> Vec<Identifier> {
    files
        .iter()
        .filter(|(_, meta)| meta.name.is_descendant_of(folder))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Every file node of the forest in depth-first order
#[must_use]
pub fn file_nodes(tree: &[TreeNode]) -> Vec<&TreeNode> {
    let mut out = Vec::new();
    for node in tree {
        match node {
            TreeNode::File { .. } => out.push(node),
            TreeNode::Folder { children, .. } => out.extend(file_nodes(children)),
        }
    }
    out
}
