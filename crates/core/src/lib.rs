//! Core plumbing for the reputation ledger
//!
//! This crate provides the key/value storage layer the ledger persists
//! reputations and vote logs through, plus small runtime helpers.

pub mod storage;
pub mod utils;

// Re-export key components
pub use storage::{
    FileStorage, JsonStorage, MemoryStorage, MockStorage, Storage, StorageError, StorageOptions,
    StorageResult,
};
pub use utils::{key_segment, timestamp_ms, timestamp_secs};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing with `RUST_LOG`, falling back to `default_level`.
///
/// Calling this more than once is harmless; later calls keep the subscriber
/// that is already installed.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Tracing subscriber already installed, keeping it");
    }
}
