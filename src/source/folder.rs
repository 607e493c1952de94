/// Filesystem-backed asset source
///
/// Every reviewable file under a root folder is one item. Identifiers are
/// absolute paths under the canonicalized root, so two folders holding a
/// file of the same name never share an identifier (or a decision).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::task;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::jpeg;
use super::traits::{AssetSource, Content, FullFetch};
use crate::error::{Error, Result};
use crate::state::data::{AssetId, ReviewSequence};

pub struct FolderSource {
    root: PathBuf,
    changes: broadcast::Sender<()>,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        // Canonical form keeps ids identical however the folder was named
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        let (changes, _) = broadcast::channel(16);
        Self { root, changes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for an identifier
    pub fn path_of(&self, id: &str) -> PathBuf {
        PathBuf::from(id)
    }

    /// Whether `id` names something inside this folder
    pub fn owns(&self, id: &str) -> bool {
        Path::new(id).starts_with(&self.root)
    }

    /// Walk the root folder and return every reviewable file in path order
    pub fn scan(&self) -> ReviewSequence {
        info!("🔍 Scanning folder: {}", self.root.display());

        let mut ids: Vec<AssetId> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && jpeg::is_reviewable(e.path()))
            .filter_map(|e| self.id_of(e.path()))
            .collect();
        ids.sort();

        info!(count = ids.len(), "✅ Scan complete");
        ReviewSequence::new(ids)
    }

    /// Tell subscribers the folder changed (e.g. from a file watcher)
    pub fn notify_changed(&self) {
        // No receivers is fine
        let _ = self.changes.send(());
    }

    /// Identifier for a file under the root
    pub fn id_of(&self, path: &Path) -> Option<AssetId> {
        path.starts_with(&self.root)
            .then(|| path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl AssetSource for FolderSource {
    async fn exists(&self, id: &str) -> bool {
        tokio::fs::metadata(self.path_of(id))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn byte_size(&self, id: &str) -> Option<u64> {
        tokio::fs::metadata(self.path_of(id)).await.ok().map(|m| m.len())
    }

    async fn fetch_preview(&self, id: &str, size: u32) -> Result<Content> {
        let path = self.path_of(id);
        let id = id.to_string();

        // Spawn blocking task for CPU-bound decode and resize
        task::spawn_blocking(move || -> Result<Content> {
            let data = std::fs::read(&path)?;
            let encoded = if jpeg::is_raw(&path) {
                jpeg::largest_jpeg(&data).ok_or_else(|| Error::ContentLoad {
                    id: id.clone(),
                    reason: "no embedded JPEG found".to_string(),
                })?
            } else {
                data.as_slice()
            };
            let preview = jpeg::render_preview(encoded, size)?;
            Ok(Content::new(preview))
        })
        .await
        .map_err(|e| Error::Source(format!("Task join error: {}", e)))?
    }

    fn fetch_full(&self, id: &str) -> BoxStream<'static, FullFetch> {
        let path = self.path_of(id);

        Box::pin(stream! {
            if jpeg::is_raw(&path) {
                // Quick stand-in from the file head while the full scan runs
                let head_path = path.clone();
                let placeholder = task::spawn_blocking(move || {
                    let head = jpeg::read_head(&head_path, jpeg::HEAD_SCAN_BYTES).ok()?;
                    jpeg::first_jpeg(&head, jpeg::MIN_PLACEHOLDER_BYTES).map(|j| j.to_vec())
                })
                .await
                .ok()
                .flatten();
                if let Some(bytes) = placeholder {
                    yield FullFetch::Degraded(Content::new(bytes));
                }
            }

            let full_path = path.clone();
            let result = task::spawn_blocking(move || -> std::result::Result<Vec<u8>, String> {
                let data = std::fs::read(&full_path).map_err(|e| e.to_string())?;
                if !jpeg::is_raw(&full_path) {
                    return Ok(data);
                }
                jpeg::largest_jpeg(&data)
                    .map(|j| j.to_vec())
                    .ok_or_else(|| "no embedded JPEG found".to_string())
            })
            .await;

            match result {
                Ok(Ok(bytes)) => {
                    debug!(path = %path.display(), bytes = bytes.len(), "Loaded full content");
                    yield FullFetch::Final(Content::new(bytes));
                }
                Ok(Err(reason)) => {
                    yield FullFetch::Failed(reason);
                }
                Err(e) => {
                    yield FullFetch::Failed(format!("Task join error: {}", e));
                }
            }
        })
    }

    async fn purge(&self, ids: &HashSet<AssetId>) -> Result<()> {
        let mut failures = Vec::new();
        for id in ids {
            if !self.owns(id) {
                warn!(
                    id = %id,
                    root = %self.root.display(),
                    "Refusing to remove file outside folder"
                );
                failures.push(format!("{}: not in {}", id, self.root.display()));
                continue;
            }
            let path = self.path_of(id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(id = %id, "Removed file"),
                // Already gone counts as removed
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to remove file");
                    failures.push(format!("{}: {}", id, e));
                }
            }
        }

        self.notify_changed();

        if failures.is_empty() {
            info!(count = ids.len(), "🗑️  Purged files");
            Ok(())
        } else {
            Err(Error::Purge(failures.join("; ")))
        }
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}
