//! # Batch Executor Library
//!
//! A bounded-concurrency batch executor for tokio.
//!
//! Given an ordered batch of items, a skip mask, and a fallible async
//! transformation, the executor runs the transformation over every
//! non-skipped item in parallel (at most `max_concurrency` at once) and
//! returns index-aligned results alongside an index-keyed error map.
//!
//! ## Quick Start
//!
//! ```rust
//! use batch_exec_lib::{BatchContext, BatchExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = BatchExecutor::new();
//!     let items = vec!["alpha".to_string(), "beta".to_string()];
//!
//!     let outcome = executor
//!         .run(&BatchContext::new(), &items, &[false, false], |_ctx, item: String| async move {
//!             Ok::<_, std::io::Error>(item.len())
//!         })
//!         .await;
//!
//!     assert_eq!(outcome.results, Some(vec![Some(5), Some(4)]));
//! }
//! ```
//!
//! ## Failure policy
//!
//! - **Per-item isolation**: an `Err` from the transformation is recorded at
//!   its index and never affects siblings.
//! - **Escalation**: a unit that panics fails the whole batch. All results
//!   are discarded and every non-skipped index reports the same
//!   [`EscalatedFailure`].

// Re-export main public API types and functions
pub use config::{
    env_config_from, load_env_config, resolve_config, ConfigManager, EnvConfig,
    ExecutorFileConfig, FileConfig,
};
pub use context::BatchContext;
pub use error::{BatchExecError, EscalatedFailure, EscalationKind, ItemFailure};
pub use executor::{run_batch, BatchExecutor};
pub use types::{
    BatchOutcome, BatchStats, ExecutorConfig, Transformed, DEFAULT_CONCURRENCY_MULTIPLIER,
    MAX_CONCURRENCY,
};
pub use utils::{available_cores, default_concurrency};

// Re-exported so callers can build contexts from their own tokens
pub use tokio_util::sync::CancellationToken;

// Internal modules - these are not part of the public API
mod concurrent;
mod config;
mod context;
mod error;
mod executor;
mod types;
mod utils;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, BatchExecError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        default_concurrency: default_concurrency(DEFAULT_CONCURRENCY_MULTIPLIER),
        features: get_enabled_features(),
    }
}

/// Information about the library build and features
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub default_concurrency: usize,
    pub features: Vec<&'static str>,
}

/// Get list of enabled features at compile time
#[allow(clippy::vec_init_then_push)]
fn get_enabled_features() -> Vec<&'static str> {
    let mut features = Vec::new();

    #[cfg(feature = "trace-units")]
    features.push("trace-units");

    features
}
