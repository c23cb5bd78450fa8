//! Utility modules for cdn-sync.

pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{Result, SyncError};
