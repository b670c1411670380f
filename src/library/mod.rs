//! Recording library
//!
//! Saved recording metadata, its stores, thumbnail generation and the
//! library facade.

pub mod manager;
pub mod schema;
pub mod store;
pub mod thumbnail;

pub use manager::Library;
pub use schema::{SaveMetadata, SavedRecording, SourceType, ThumbnailStatus};
pub use store::{DirectoryStore, LibraryStore, MemoryStore};
