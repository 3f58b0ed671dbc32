//! connectome: a multi-platform messaging bridge adapter. Each process
//! connects one upstream chat platform (or a local file/shell pseudo-platform)
//! to a single downstream controller over a socket.io channel, normalizing
//! upstream events into a platform-independent schema and dispatching
//! validated, rate-limited outgoing commands back upstream.

pub mod attachments;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod emoji;
pub mod error;
pub mod events;
pub mod file_adapter;
pub mod history;
pub mod platform;
pub mod processors;
pub mod rate_limiter;
pub mod shell_adapter;
pub mod transport;

pub use error::{Error, Result};
