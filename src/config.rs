//! Configuration loading and validation.
//!
//! `Config::load_from_path` parses a TOML file into [`RawConfig`] (every
//! field optional, `#[serde(default)]` throughout) and resolves it into the
//! typed config below, applying defaults and `CONNECTOME_*`/per-platform
//! environment overrides on top. `Config::load` does the same without a
//! file, so a bare environment (as in a container) is enough to run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::rate_limiter::{BucketConfig, Scope};

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub adapter: AdapterConfig,
    pub credentials: PlatformCredentials,
    pub rate_limits: RateLimitConfig,
    pub attachments: AttachmentConfig,
    pub caching: CachingConfig,
    pub file_adapter: FileAdapterConfig,
    pub shell_adapter: ShellAdapterConfig,
    pub socket_io: SocketIoConfig,
}

/// Identity and transport-facing limits for this adapter process.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub adapter_type: String,
    pub adapter_id: String,
    pub adapter_name: String,
    pub max_history_limit: u32,
    pub max_pagination_iterations: u32,
    pub max_message_length: usize,
    pub connection_check_interval_secs: u64,
    pub max_reconnect_attempts: u32,
}

/// Per-platform tokens, read straight from the environment like the
/// teacher reads `ANTHROPIC_API_KEY`/`OPENAI_API_KEY` — these never live in
/// a checked-in TOML file.
#[derive(Debug, Clone, Default)]
pub struct PlatformCredentials {
    pub discord_bot_token: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub zulip_site: Option<String>,
    pub zulip_email: Option<String>,
    pub zulip_api_key: Option<String>,
}

/// One entry of the rate limiter's per-operation table.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawScope {
    Global,
    PerConversation,
    PerUrl,
}

impl From<RawScope> for Scope {
    fn from(value: RawScope) -> Self {
        match value {
            RawScope::Global => Scope::Global,
            RawScope::PerConversation => Scope::PerConversation,
            RawScope::PerUrl => Scope::PerUrl,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub buckets: HashMap<String, (Scope, BucketConfig)>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(
            "send_message".to_string(),
            (Scope::PerConversation, BucketConfig {
                requests_per_second: 1,
                requests_per_minute: 20,
                requests_per_hour: 1000,
            }),
        );
        buckets.insert(
            "fetch_history".to_string(),
            (Scope::PerConversation, BucketConfig {
                requests_per_second: 1,
                requests_per_minute: 10,
                requests_per_hour: 200,
            }),
        );
        buckets.insert(
            "download_attachment".to_string(),
            (Scope::PerUrl, BucketConfig {
                requests_per_second: 2,
                requests_per_minute: 30,
                requests_per_hour: 500,
            }),
        );
        Self { buckets }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    pub storage_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub large_file_threshold_mb: u64,
    pub max_attachments_per_message: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CachingConfig {
    pub max_messages_per_conversation: usize,
    pub max_total_messages: usize,
    pub max_attachments: usize,
    pub max_users: usize,
    pub max_age_hours: f64,
    pub maintenance_interval_secs: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            max_messages_per_conversation: 500,
            max_total_messages: 50_000,
            max_attachments: 10_000,
            max_users: 10_000,
            max_age_hours: 72.0,
            maintenance_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileAdapterConfig {
    pub workspace_directory: PathBuf,
    pub backup_directory: PathBuf,
    pub event_ttl_hours: f64,
    pub cleanup_interval_hours: f64,
    pub max_events_per_file: usize,
    pub max_file_size: u64,
    pub max_token_count: usize,
    pub security_mode: SecurityMode,
    pub allowed_extensions: Vec<String>,
    pub blocked_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Strict,
    Permissive,
    Unrestricted,
}

#[derive(Debug, Clone)]
pub struct ShellAdapterConfig {
    pub workspace_directory: PathBuf,
    pub session_max_lifetime_secs: u64,
    pub command_max_lifetime_secs: u64,
    pub cpu_percent_limit: f32,
    pub memory_mb_limit: u64,
    pub max_output_size: usize,
    pub begin_output_size: usize,
    pub end_output_size: usize,
}

#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    pub url: String,
    pub reconnect_backoff_ms_base: u64,
    pub reconnect_backoff_ms_max: u64,
}

/// Mirror of [`Config`] as parsed from TOML: every field optional so a
/// partial file (or none at all) still resolves via defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    data_dir: Option<String>,
    adapter: RawAdapterConfig,
    rate_limits: HashMap<String, RawBucketConfig>,
    attachments: RawAttachmentConfig,
    caching: RawCachingConfig,
    file_adapter: RawFileAdapterConfig,
    shell_adapter: RawShellAdapterConfig,
    socket_io: RawSocketIoConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAdapterConfig {
    adapter_type: Option<String>,
    adapter_id: Option<String>,
    adapter_name: Option<String>,
    max_history_limit: Option<u32>,
    max_pagination_iterations: Option<u32>,
    max_message_length: Option<usize>,
    connection_check_interval_secs: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawBucketConfig {
    scope: RawScope,
    requests_per_second: u32,
    requests_per_minute: u32,
    requests_per_hour: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAttachmentConfig {
    storage_dir: Option<String>,
    max_file_size_mb: Option<u64>,
    large_file_threshold_mb: Option<u64>,
    max_attachments_per_message: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCachingConfig {
    max_messages_per_conversation: Option<usize>,
    max_total_messages: Option<usize>,
    max_attachments: Option<usize>,
    max_users: Option<usize>,
    max_age_hours: Option<f64>,
    maintenance_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFileAdapterConfig {
    workspace_directory: Option<String>,
    backup_directory: Option<String>,
    event_ttl_hours: Option<f64>,
    cleanup_interval_hours: Option<f64>,
    max_events_per_file: Option<usize>,
    max_file_size: Option<u64>,
    max_token_count: Option<usize>,
    security_mode: Option<SecurityMode>,
    allowed_extensions: Option<Vec<String>>,
    blocked_extensions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawShellAdapterConfig {
    workspace_directory: Option<String>,
    session_max_lifetime_secs: Option<u64>,
    command_max_lifetime_secs: Option<u64>,
    cpu_percent_limit: Option<f32>,
    memory_mb_limit: Option<u64>,
    max_output_size: Option<usize>,
    begin_output_size: Option<usize>,
    end_output_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSocketIoConfig {
    url: Option<String>,
    reconnect_backoff_ms_base: Option<u64>,
    reconnect_backoff_ms_max: Option<u64>,
}

/// Recognized `adapter_type` values; anything else is rejected at load time
/// rather than discovered later as an `Unsupported` platform error.
const KNOWN_ADAPTER_TYPES: &[&str] = &[
    "discord",
    "discord_webhook",
    "telegram",
    "slack",
    "zulip",
    "file",
    "shell",
];

impl Config {
    /// Load configuration from the environment alone (no config file),
    /// mirroring the teacher's `SPACEBOT_*`-by-default startup path.
    pub fn load() -> Result<Self> {
        Self::resolve(RawConfig::default())
    }

    /// Load from a TOML file, then apply the same environment overrides as
    /// [`Config::load`]. A missing or unreadable file is an error; an empty
    /// file resolves entirely from defaults and the environment.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Self> {
        let data_dir = raw
            .data_dir
            .or_else(|| std::env::var("CONNECTOME_DATA_DIR").ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .map(|d| d.join("connectome"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });
        std::fs::create_dir_all(&data_dir).map_err(|source| ConfigError::Load {
            path: data_dir.display().to_string(),
            source,
        })?;

        let adapter_type = raw
            .adapter
            .adapter_type
            .or_else(|| std::env::var("CONNECTOME_ADAPTER_TYPE").ok())
            .ok_or_else(|| ConfigError::MissingKey("adapter.adapter_type".into()))?;
        if !KNOWN_ADAPTER_TYPES.contains(&adapter_type.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown adapter_type {adapter_type:?}, expected one of {KNOWN_ADAPTER_TYPES:?}"
            ))
            .into());
        }

        let adapter = AdapterConfig {
            adapter_type: adapter_type.clone(),
            adapter_id: raw
                .adapter
                .adapter_id
                .or_else(|| std::env::var("CONNECTOME_ADAPTER_ID").ok())
                .unwrap_or_else(|| adapter_type.clone()),
            adapter_name: raw
                .adapter
                .adapter_name
                .or_else(|| std::env::var("CONNECTOME_ADAPTER_NAME").ok())
                .unwrap_or_else(|| adapter_type.clone()),
            max_history_limit: raw.adapter.max_history_limit.unwrap_or(100),
            max_pagination_iterations: raw.adapter.max_pagination_iterations.unwrap_or(10),
            max_message_length: raw.adapter.max_message_length.unwrap_or(2000),
            connection_check_interval_secs: raw.adapter.connection_check_interval_secs.unwrap_or(30),
            max_reconnect_attempts: raw.adapter.max_reconnect_attempts.unwrap_or(5),
        };

        let credentials = PlatformCredentials {
            discord_bot_token: std::env::var("DISCORD_BOT_TOKEN").ok(),
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            slack_bot_token: std::env::var("SLACK_BOT_TOKEN").ok(),
            zulip_site: std::env::var("ZULIP_SITE").ok(),
            zulip_email: std::env::var("ZULIP_EMAIL").ok(),
            zulip_api_key: std::env::var("ZULIP_API_KEY").ok(),
        };
        Self::require_credentials(&adapter.adapter_type, &credentials)?;

        let rate_limits = if raw.rate_limits.is_empty() {
            RateLimitConfig::default()
        } else {
            RateLimitConfig {
                buckets: raw
                    .rate_limits
                    .into_iter()
                    .map(|(op, cfg)| {
                        (
                            op,
                            (
                                cfg.scope.into(),
                                BucketConfig {
                                    requests_per_second: cfg.requests_per_second,
                                    requests_per_minute: cfg.requests_per_minute,
                                    requests_per_hour: cfg.requests_per_hour,
                                },
                            ),
                        )
                    })
                    .collect(),
            }
        };

        let attachments = AttachmentConfig {
            storage_dir: raw
                .attachments
                .storage_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("attachments")),
            max_file_size_mb: raw.attachments.max_file_size_mb.unwrap_or(50),
            large_file_threshold_mb: raw.attachments.large_file_threshold_mb.unwrap_or(8),
            max_attachments_per_message: raw.attachments.max_attachments_per_message.unwrap_or(10),
        };

        let caching = {
            let defaults = CachingConfig::default();
            CachingConfig {
                max_messages_per_conversation: raw
                    .caching
                    .max_messages_per_conversation
                    .unwrap_or(defaults.max_messages_per_conversation),
                max_total_messages: raw.caching.max_total_messages.unwrap_or(defaults.max_total_messages),
                max_attachments: raw.caching.max_attachments.unwrap_or(defaults.max_attachments),
                max_users: raw.caching.max_users.unwrap_or(defaults.max_users),
                max_age_hours: raw.caching.max_age_hours.unwrap_or(defaults.max_age_hours),
                maintenance_interval_secs: raw
                    .caching
                    .maintenance_interval_secs
                    .unwrap_or(defaults.maintenance_interval_secs),
            }
        };

        let file_adapter = FileAdapterConfig {
            workspace_directory: raw
                .file_adapter
                .workspace_directory
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("workspace")),
            backup_directory: raw
                .file_adapter
                .backup_directory
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("file_backups")),
            event_ttl_hours: raw.file_adapter.event_ttl_hours.unwrap_or(24.0),
            cleanup_interval_hours: raw.file_adapter.cleanup_interval_hours.unwrap_or(1.0),
            max_events_per_file: raw.file_adapter.max_events_per_file.unwrap_or(50),
            max_file_size: raw.file_adapter.max_file_size.unwrap_or(5 * 1024 * 1024),
            max_token_count: raw.file_adapter.max_token_count.unwrap_or(100_000),
            security_mode: raw.file_adapter.security_mode.unwrap_or(SecurityMode::Strict),
            allowed_extensions: raw.file_adapter.allowed_extensions.unwrap_or_else(|| {
                ["txt", "md", "rs", "py", "js", "ts", "json", "toml", "yaml", "yml"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
            blocked_extensions: raw.file_adapter.blocked_extensions.unwrap_or_else(|| {
                ["exe", "dll", "so", "dylib", "bin"].iter().map(|s| s.to_string()).collect()
            }),
        };

        let shell_adapter = ShellAdapterConfig {
            workspace_directory: raw
                .shell_adapter
                .workspace_directory
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("shell_workspace")),
            session_max_lifetime_secs: raw.shell_adapter.session_max_lifetime_secs.unwrap_or(3600),
            command_max_lifetime_secs: raw.shell_adapter.command_max_lifetime_secs.unwrap_or(120),
            cpu_percent_limit: raw.shell_adapter.cpu_percent_limit.unwrap_or(80.0),
            memory_mb_limit: raw.shell_adapter.memory_mb_limit.unwrap_or(512),
            max_output_size: raw.shell_adapter.max_output_size.unwrap_or(64 * 1024),
            begin_output_size: raw.shell_adapter.begin_output_size.unwrap_or(16 * 1024),
            end_output_size: raw.shell_adapter.end_output_size.unwrap_or(16 * 1024),
        };

        let socket_io = SocketIoConfig {
            url: raw
                .socket_io
                .url
                .or_else(|| std::env::var("CONNECTOME_SOCKETIO_URL").ok())
                .unwrap_or_else(|| "http://localhost:3001".to_string()),
            reconnect_backoff_ms_base: raw.socket_io.reconnect_backoff_ms_base.unwrap_or(500),
            reconnect_backoff_ms_max: raw.socket_io.reconnect_backoff_ms_max.unwrap_or(30_000),
        };

        Ok(Self {
            data_dir,
            adapter,
            credentials,
            rate_limits,
            attachments,
            caching,
            file_adapter,
            shell_adapter,
            socket_io,
        })
    }

    /// The file and shell adapters need no network credentials; every
    /// messaging platform needs at least its bot token/site key present.
    fn require_credentials(adapter_type: &str, creds: &PlatformCredentials) -> Result<()> {
        let missing = match adapter_type {
            "discord" => creds.discord_bot_token.is_none().then_some("DISCORD_BOT_TOKEN"),
            "discord_webhook" => creds.discord_webhook_url.is_none().then_some("DISCORD_WEBHOOK_URL"),
            "telegram" => creds.telegram_bot_token.is_none().then_some("TELEGRAM_BOT_TOKEN"),
            "slack" => creds.slack_bot_token.is_none().then_some("SLACK_BOT_TOKEN"),
            "zulip" => (creds.zulip_site.is_none() || creds.zulip_email.is_none() || creds.zulip_api_key.is_none())
                .then_some("ZULIP_SITE/ZULIP_EMAIL/ZULIP_API_KEY"),
            "file" | "shell" => None,
            _ => None,
        };
        if let Some(key) = missing {
            return Err(ConfigError::MissingKey(key.into()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        for (k, _) in vars {
            std::env::remove_var(k);
        }
        result
    }

    #[test]
    fn load_fails_without_adapter_type() {
        let result = Config::load();
        assert!(result.is_err());
    }

    #[test]
    fn load_fails_without_matching_credential() {
        let result = with_env(&[("CONNECTOME_ADAPTER_TYPE", "discord")], Config::load);
        assert!(result.is_err());
    }

    #[test]
    fn load_succeeds_with_token_present() {
        let result = with_env(
            &[
                ("CONNECTOME_ADAPTER_TYPE", "discord"),
                ("DISCORD_BOT_TOKEN", "fake-token"),
            ],
            Config::load,
        );
        let config = result.expect("config should load with a token present");
        assert_eq!(config.adapter.adapter_type, "discord");
        assert_eq!(config.credentials.discord_bot_token.as_deref(), Some("fake-token"));
    }

    #[test]
    fn file_and_shell_adapters_need_no_token() {
        let result = with_env(&[("CONNECTOME_ADAPTER_TYPE", "file")], Config::load);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_unknown_adapter_type() {
        let result = with_env(&[("CONNECTOME_ADAPTER_TYPE", "carrier_pigeon")], Config::load);
        assert!(result.is_err());
    }
}
