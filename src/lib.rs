/// Photo triage engine
///
/// Walks a collection of photos one at a time so each can be kept or
/// marked for deletion, then purges the deleted ones in a single step.
/// - Durable decisions and their statistics (state)
/// - Where photos come from (source)
/// - Sliding-window prefetching of photo content (cache)
/// - Navigation and the session task that coordinates it all (session)

pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod source;
pub mod state;

pub use config::{CacheConfig, EngineConfig};
pub use error::{Error, Result};
pub use session::{Direction, Phase, PurgeReport, SessionHandle, SessionSnapshot};
pub use source::{AssetSource, Content, FolderSource, FullFetch};
pub use state::{AssetId, Decision, DecisionStats, DecisionStore, ReviewSequence};
