/// Asset source module
///
/// This module handles where reviewable items come from:
/// - The capability every source provides (traits.rs)
/// - A photo folder on disk (folder.rs)
/// - Embedded JPEG extraction and preview rendering (jpeg.rs)

pub mod folder;
pub mod jpeg;
pub mod traits;

pub use folder::FolderSource;
pub use traits::{AssetSource, Content, FullFetch};
