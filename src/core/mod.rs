// Public modules
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod history;
pub mod rules;
pub mod template;
pub mod transport;

// Internal modules - not part of public API
pub(crate) mod local_files;
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
