/// Review session module
///
/// This module ties the store, the navigation rules and the cache together:
/// - Navigation state machine over the review sequence (navigation.rs)
/// - Immutable view of the session for presentation (snapshot.rs)
/// - The single task that owns and coordinates everything (coordinator.rs)

pub mod coordinator;
pub mod navigation;
pub mod snapshot;

pub use coordinator::{open, PurgeReport, SessionHandle};
pub use navigation::{Direction, Navigator, Phase};
pub use snapshot::SessionSnapshot;
