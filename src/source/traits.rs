use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::state::data::AssetId;

/// Loaded content for one item (encoded image bytes)
#[derive(Clone, PartialEq, Eq)]
pub struct Content(Bytes);

impl Content {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Content({} bytes)", self.0.len())
    }
}

/// One step of a full-resolution fetch
#[derive(Debug, Clone)]
pub enum FullFetch {
    /// Low-fidelity stand-in; more is coming
    Degraded(Content),
    /// The real thing
    Final(Content),
    /// The fetch gave up
    Failed(String),
}

/// Where items come from.
///
/// The source is the only authority on which items exist. Every query
/// returns a fresh answer; callers never cache whole item records.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn exists(&self, id: &str) -> bool;

    /// Subset of `ids` that still exist
    async fn existing(&self, ids: &[AssetId]) -> HashSet<AssetId> {
        let mut found = HashSet::new();
        for id in ids {
            if self.exists(id).await {
                found.insert(id.clone());
            }
        }
        found
    }

    async fn byte_size(&self, id: &str) -> Option<u64>;

    /// Small rendition that fits in a `size`×`size` box
    async fn fetch_preview(&self, id: &str, size: u32) -> Result<Content>;

    /// Full-resolution content: any number of `Degraded` items, then at
    /// most one `Final` or `Failed`. Ending without either is a failure.
    fn fetch_full(&self, id: &str) -> BoxStream<'static, FullFetch>;

    /// Permanently remove `ids`. `Ok` means every one is gone.
    async fn purge(&self, ids: &HashSet<AssetId>) -> Result<()>;

    /// Fires whenever the underlying collection may have changed
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}
