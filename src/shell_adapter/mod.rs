//! The shell adapter: per-session long-lived subprocesses with CPU/memory/
//! lifetime caps, output truncation, and `pwd`-based working-directory
//! resync after every command.

pub mod executor;
pub mod processor;
pub mod session;

pub use executor::{CommandExecutor, SessionManager};
pub use processor::{ShellAdapterCommand, ShellAdapterProcessor, ShellAdapterReply};
pub use session::Session;
