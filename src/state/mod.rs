/// State management module
///
/// This module handles all durable review state, including:
/// - Shared data structures (data.rs)
/// - The decision store and its statistics (decisions.rs)
/// - The on-disk decision file format (persist.rs)

pub mod data;
pub mod decisions;
pub mod persist;

pub use data::{AssetId, Decision, DecisionLookup, DecisionStats, ReviewSequence};
pub use decisions::{DecisionStore, KeptStorageScan, ReconcileReport};
