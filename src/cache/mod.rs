/// Prefetch cache module
///
/// - Window arithmetic over the visible sequence (window.rs)
/// - The cache itself, its fetch tasks and their messages (prefetch.rs)

pub mod prefetch;
pub mod window;

pub use prefetch::{ContentState, FetchEvent, FetchKind, FetchOutcome, PrefetchCache};
pub use window::CacheWindow;
