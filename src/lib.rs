pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::AssetSyncConfig;
pub use core::{SyncContext, SyncEngine, SyncMode, SyncReport};
pub use error::{SyncError, SyncResult};
