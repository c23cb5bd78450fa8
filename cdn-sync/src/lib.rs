//! cdn-sync library
//!
//! Incremental uploader that keeps an object-storage CDN bucket in sync with a
//! static site's build output, using a remote manifest to upload only what
//! changed.

pub mod commands;
pub mod config;
pub mod executor;
pub mod fs;
pub mod manifest;
pub mod store;
pub mod sync;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
