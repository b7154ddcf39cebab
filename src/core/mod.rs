// Public modules
pub mod command;
pub mod config;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod output;
pub mod release;
pub mod server;
pub mod ssh;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use output::{BulkResult, BulkSummary, HostError, HostOutcome};
