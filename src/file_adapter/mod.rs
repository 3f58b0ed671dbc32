//! The file adapter: workspace-scoped file operations with a reversible
//! undo log, gated by a configurable security mode.

pub mod event_cache;
pub mod processor;
pub mod validator;

pub use event_cache::FileEventCache;
pub use processor::{FileAdapterCommand, FileAdapterProcessor, FileAdapterReply};
pub use validator::PathValidator;
