use std::collections::HashSet;
use std::ops::Range;

use crate::config::CacheConfig;
use crate::state::data::AssetId;

/// Indices `[index - behind, index + ahead]` clamped to `0..len`
pub fn span(index: usize, len: usize, behind: usize, ahead: usize) -> Range<usize> {
    let start = index.saturating_sub(behind);
    let end = index.saturating_add(ahead).saturating_add(1).min(len);
    start..end
}

/// The part of the visible sequence worth keeping cached around one item
#[derive(Debug, Clone)]
pub struct CacheWindow {
    center: AssetId,
    center_index: usize,
    full: HashSet<AssetId>,
    preview: HashSet<AssetId>,
    /// Items right after the center, nearest first, for speculative fetches
    upcoming: Vec<AssetId>,
}

impl CacheWindow {
    /// Window around `center`, or `None` if `center` is not visible
    pub fn around(center: &str, visible: &[AssetId], config: &CacheConfig) -> Option<Self> {
        let center_index = visible.iter().position(|id| id == center)?;
        let len = visible.len();

        let full_span = span(center_index, len, config.full_behind, config.full_ahead);
        let preview_span = span(center_index, len, config.preview_behind, config.preview_ahead);
        let upcoming_span = span(center_index, len, 0, config.prefetch_ahead);

        Some(Self {
            center: center.to_string(),
            center_index,
            full: visible[full_span].iter().cloned().collect(),
            preview: visible[preview_span].iter().cloned().collect(),
            upcoming: visible[upcoming_span].iter().skip(1).cloned().collect(),
        })
    }

    pub fn center(&self) -> &str {
        &self.center
    }

    /// Index of the center in the visible sequence it was built from
    pub fn center_index(&self) -> usize {
        self.center_index
    }

    pub fn contains_full(&self, id: &str) -> bool {
        self.full.contains(id)
    }

    pub fn contains_preview(&self, id: &str) -> bool {
        self.preview.contains(id)
    }

    pub fn upcoming(&self) -> &[AssetId] {
        &self.upcoming
    }
}
