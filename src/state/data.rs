/// Shared data structures for the review state
///
/// These types flow between the decision store, the navigation state
/// machine and whatever presents the session to the user.

use std::collections::HashMap;

/// Opaque, stable key naming one reviewable item.
/// Issued by the asset source; the engine never invents or edits one.
pub type AssetId = String;

/// What the user decided about a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Decision {
    /// No decision yet (also the answer for unknown identifiers)
    #[default]
    Unset,
    /// Keep the item
    Kept,
    /// Remove the item on the next purge
    Deleted,
}

impl Decision {
    pub fn is_decided(self) -> bool {
        self != Decision::Unset
    }
}

/// Read access to decisions, used by navigation to compute what is visible
pub trait DecisionLookup {
    fn decision(&self, id: &str) -> Decision;

    fn is_decided(&self, id: &str) -> bool {
        self.decision(id).is_decided()
    }
}

impl DecisionLookup for HashMap<AssetId, Decision> {
    fn decision(&self, id: &str) -> Decision {
        self.get(id).copied().unwrap_or_default()
    }
}

/// Aggregate statistics over the decision store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionStats {
    /// Number of items currently marked kept
    pub kept_count: usize,
    /// Number of items waiting to be purged
    pub deleted_count: usize,
    /// Items removed by confirmed purges, all time
    pub total_items_purged: u64,
    /// Bytes reclaimed by confirmed purges, all time
    pub total_bytes_freed: u64,
    /// Total size of kept items, `None` while it needs recomputing
    pub kept_storage_bytes: Option<u64>,
}

/// Immutable, ordered list of identifiers fixed when a session opens
///
/// Duplicates are dropped (first occurrence wins) so every identifier
/// has exactly one position.
#[derive(Debug, Clone, Default)]
pub struct ReviewSequence {
    ids: Vec<AssetId>,
    positions: HashMap<AssetId, usize>,
}

impl ReviewSequence {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AssetId>,
    {
        let mut sequence = Self::default();
        for id in ids {
            let id = id.into();
            if sequence.positions.contains_key(&id) {
                continue;
            }
            sequence.positions.insert(id.clone(), sequence.ids.len());
            sequence.ids.push(id);
        }
        sequence
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AssetId> {
        self.ids.get(index)
    }

    /// Position of `id` in the full sequence
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetId> {
        self.ids.iter()
    }
}
