//! Top-level error types for the bridge core.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    FileAdapter(#[from] FileAdapterError),

    #[error(transparent)]
    ShellAdapter(#[from] ShellAdapterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The wire-level `kind` string reported in `request_failed`, for
    /// whichever domain error this wraps.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "invalid_request",
            Error::Transport(_) => "transient_network",
            Error::Platform(inner) => inner.kind(),
            Error::Attachment(_) => "io_error",
            Error::FileAdapter(_) => "invalid_request",
            Error::ShellAdapter(_) => "invalid_request",
            Error::Io(_) => "io_error",
            Error::Other(_) => "internal",
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Socket.IO transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to controller at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("emit failed for event {event}: {source}")]
    Emit {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("malformed bot_response payload: {0}")]
    MalformedPayload(String),
}

/// Errors surfaced by a platform driver.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation not supported by this adapter: {0}")]
    Unsupported(String),

    #[error("unsupported emoji: {0}")]
    UnknownEmoji(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited upstream: {0}")]
    RateLimitedUpstream(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("local io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// The wire-level `kind` string reported in `request_failed`.
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::InvalidRequest(_) => "invalid_request",
            PlatformError::Unsupported(_) => "unsupported",
            PlatformError::UnknownEmoji(_) => "unknown_emoji",
            PlatformError::NotFound(_) => "not_found",
            PlatformError::RateLimitedUpstream(_) => "rate_limited_upstream",
            PlatformError::TransientNetwork(_) => "transient_network",
            PlatformError::Io(_) => "io_error",
            PlatformError::Internal(_) => "internal",
        }
    }
}

/// Attachment pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("sidecar metadata corrupt for {attachment_id}: {reason}")]
    CorruptSidecar {
        attachment_id: String,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// File adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum FileAdapterError {
    #[error("path escapes workspace: {0}")]
    PathEscape(String),

    #[error("extension not permitted under security mode {mode}: {extension}")]
    ExtensionBlocked { mode: String, extension: String },

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("no recorded event to undo for {0}")]
    NothingToUndo(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shell adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum ShellAdapterError {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {0} expired")]
    SessionExpired(String),

    #[error("command exceeded resource limits: {0}")]
    ResourceLimitExceeded(String),

    #[error("command exceeded lifetime of {0:?}")]
    LifetimeExceeded(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
