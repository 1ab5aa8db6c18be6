//! Tree providers: where directory listings come from

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::node::{join_path, normalize_relative, Node, NodeKind};
use crate::operation::validate_root;
use crate::process::{run_and_parse, CommandSpec};
use crate::wire::decode_nodes;

/// Source of directory listings for one server.
///
/// `list` returns a single level of `root/directory` (an empty `directory`
/// means the root itself). Returned nodes carry relative paths computed
/// against `root`, never against `directory`.
#[async_trait]
pub trait TreeProvider: Send + Sync {
    async fn list(&self, root: &str, directory: &str) -> Result<Vec<Node>>;
}

#[async_trait]
impl<T: TreeProvider + ?Sized> TreeProvider for Box<T> {
    async fn list(&self, root: &str, directory: &str) -> Result<Vec<Node>> {
        (**self).list(root, directory).await
    }
}

/// List `relative_path` and splice the listing into `tree` as that
/// directory's children. An empty path lists the root and replaces the
/// top level.
pub async fn expand_directory<P>(
    provider: &P,
    root: &str,
    tree: &[Node],
    relative_path: &str,
) -> Result<Vec<Node>>
where
    P: TreeProvider + ?Sized,
{
    let wanted = normalize_relative(relative_path);
    let listing = provider.list(root, &wanted).await?;

    if wanted.is_empty() {
        return Ok(listing);
    }

    let mut result = tree.to_vec();
    if !splice(&mut result, &wanted, &listing) {
        debug!("Expanded directory '{}' is not in the tree", wanted);
    }
    Ok(result)
}

fn splice(nodes: &mut [Node], wanted: &str, listing: &[Node]) -> bool {
    for node in nodes.iter_mut() {
        if normalize_relative(&node.relative_path) == wanted {
            node.children = listing.to_vec();
            return true;
        }
        if splice(&mut node.children, wanted, listing) {
            return true;
        }
    }
    false
}

/// Load a complete tree by expanding every directory level by level
#[instrument(skip(provider))]
pub async fn load_tree<P>(provider: &P, root: &str) -> Result<Vec<Node>>
where
    P: TreeProvider + ?Sized,
{
    validate_root(root)?;

    let mut tree = provider.list(root, "").await?;
    let mut pending: Vec<String> = directories(&tree);

    while let Some(directory) = pending.pop() {
        let listing = provider.list(root, &directory).await?;
        pending.extend(directories(&listing));
        splice(&mut tree, &directory, &listing);
    }

    debug!(
        nodes = tree.iter().map(Node::count).sum::<usize>(),
        "Tree loaded"
    );
    Ok(tree)
}

fn directories(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.is_dir())
        .map(|n| normalize_relative(&n.relative_path))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Options for listing a locally mounted tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalFsOptions {
    /// Follow symbolic links
    pub follow_links: bool,
    /// Include hidden files and directories
    pub include_hidden: bool,
}

impl Default for LocalFsOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            include_hidden: true,
        }
    }
}

/// Provider over a directory on the local filesystem (or a mounted share)
#[derive(Debug, Clone, Default)]
pub struct LocalFsProvider {
    options: LocalFsOptions,
}

impl LocalFsProvider {
    pub fn new(options: LocalFsOptions) -> Self {
        Self { options }
    }

    fn list_blocking(&self, root: &Path, directory: &str) -> Result<Vec<Node>> {
        let dir_path = if directory.is_empty() {
            root.to_path_buf()
        } else {
            root.join(directory)
        };

        if !dir_path.is_dir() {
            return Err(SyncError::path_error(&dir_path, "Path is not a directory"));
        }

        let walker = WalkDir::new(&dir_path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.options.follow_links)
            .sort_by_file_name();

        let root_str = root.to_string_lossy();
        let mut nodes = Vec::new();

        for entry in walker {
            let entry = entry.map_err(|e| {
                SyncError::path_error(&dir_path, format!("Walk error: {}", e))
            })?;
            let path = entry.path();

            if !self.options.include_hidden && is_hidden(path) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| {
                SyncError::path_error(path, format!("Failed to read metadata: {}", e))
            })?;

            let relative = path
                .strip_prefix(root)
                .map_err(|e| {
                    SyncError::path_error(path, format!("Failed to create relative path: {}", e))
                })?
                .to_string_lossy()
                .to_string();

            let modified = to_utc(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));

            let mut node = if metadata.is_dir() {
                Node::directory(&root_str, &relative, modified, Vec::new())
            } else {
                Node::file(&root_str, &relative, metadata.len(), modified)
            };
            node.path = path.to_string_lossy().to_string();
            node.id = node.path.clone();
            nodes.push(node);
        }

        Ok(nodes)
    }
}

#[async_trait]
impl TreeProvider for LocalFsProvider {
    async fn list(&self, root: &str, directory: &str) -> Result<Vec<Node>> {
        let provider = self.clone();
        let root_path = PathBuf::from(root);
        let directory = normalize_relative(directory);
        let root_name = root.to_string();

        tokio::task::spawn_blocking(move || provider.list_blocking(&root_path, &directory))
            .await
            .map_err(|e| SyncError::provider(root_name, format!("listing task failed: {}", e)))?
    }
}

/// Check if a path is hidden (starts with '.')
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Provider backed by an external listing program.
///
/// The program is invoked as `<program> <args..> --root <root> --directory <dir>`
/// and must print a JSON node array on stdout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, root: &str, directory: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .args(["--root", root, "--directory", directory])
    }
}

#[async_trait]
impl TreeProvider for CommandProvider {
    async fn list(&self, root: &str, directory: &str) -> Result<Vec<Node>> {
        validate_root(root)?;
        let directory = normalize_relative(directory);
        if directory.split('/').any(|segment| segment == "..") {
            return Err(SyncError::validation(format!(
                "directory '{}' escapes the tree root",
                directory
            )));
        }

        let spec = self.command(root, &directory);
        let mut nodes = run_and_parse(&spec, |body| decode_nodes(body).map_err(|e| e.to_string()))
            .await
            .into_result()
            .map_err(|message| SyncError::provider(root, message))?;

        for node in &mut nodes {
            fill_absolute_paths(node, root);
        }
        Ok(nodes)
    }
}

/// Scripts may omit absolute paths; derive them from the root
fn fill_absolute_paths(node: &mut Node, root: &str) {
    if node.path.is_empty() || node.path == node.relative_path {
        node.path = join_path(root, &node.relative_path);
        if node.id.is_empty() || node.id == node.relative_path {
            node.id = node.path.clone();
        }
    }
    if node.kind == NodeKind::File && !node.children.is_empty() {
        node.kind = NodeKind::Directory;
    }
    for child in &mut node.children {
        fill_absolute_paths(child, root);
    }
}
