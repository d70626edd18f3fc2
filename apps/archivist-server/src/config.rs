//! Configuration management for Archivist Server
//!
//! Every option can be given as a flag or an `ARCHIVIST_*` environment
//! variable (a `.env` file is loaded first).

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::storage::{HttpB2ApiConfig, RetryPolicy, SessionPolicy, DEFAULT_AUTH_URL};

/// Default request body cap: 512MB
pub const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

/// Command line / environment arguments
#[derive(Debug, Clone, Parser)]
#[command(name = "archivist-server", version, about = "Relay file uploads to Backblaze B2")]
pub struct Args {
    /// Address to bind to
    #[arg(long, env = "ARCHIVIST_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// B2 application key id
    #[arg(long = "b2-key-id", env = "ARCHIVIST_B2_KEY_ID", default_value = "")]
    pub b2_key_id: String,

    /// B2 application key
    #[arg(
        long = "b2-key-token",
        env = "ARCHIVIST_B2_KEY_TOKEN",
        default_value = "",
        hide_env_values = true
    )]
    pub b2_key_token: String,

    /// B2 bucket id to upload into
    #[arg(long = "b2-bucket-id", env = "ARCHIVIST_B2_BUCKET_ID", default_value = "")]
    pub b2_bucket_id: String,

    /// Account authorization endpoint
    #[arg(long = "b2-auth-url", env = "ARCHIVIST_B2_AUTH_URL", default_value = DEFAULT_AUTH_URL)]
    pub b2_auth_url: String,

    /// Upload attempts per file
    #[arg(long, env = "ARCHIVIST_UPLOAD_ATTEMPTS", default_value_t = 5)]
    pub upload_attempts: u32,

    /// Pause after a 408/429 reply, in milliseconds
    #[arg(long, env = "ARCHIVIST_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub retry_backoff_ms: u64,

    /// Whether fetching a new upload url re-authorizes the account
    #[arg(long, env = "ARCHIVIST_SESSION_POLICY", value_enum, default_value_t = SessionPolicyArg::Eager)]
    pub session_policy: SessionPolicyArg,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "ARCHIVIST_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Give up on an upload after this many seconds
    #[arg(long, env = "ARCHIVIST_UPLOAD_DEADLINE_SECS")]
    pub upload_deadline_secs: Option<u64>,

    /// Timeout for each individual B2 request, in seconds
    #[arg(long, env = "ARCHIVIST_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Log output format
    #[arg(long, env = "ARCHIVIST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SessionPolicyArg {
    Eager,
    OnDemand,
}

impl From<SessionPolicyArg> for SessionPolicy {
    fn from(arg: SessionPolicyArg) -> Self {
        match arg {
            SessionPolicyArg::Eager => SessionPolicy::Eager,
            SessionPolicyArg::OnDemand => SessionPolicy::OnDemand,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub b2: B2Config,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub log_format: LogFormat,
}

#[derive(Clone)]
pub struct B2Config {
    pub key_id: String,
    pub key_token: String,
    pub bucket_id: String,
    pub auth_url: String,
    pub request_timeout: Option<Duration>,
    pub session_policy: SessionPolicy,
}

impl std::fmt::Debug for B2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Config")
            .field("key_id", &self.key_id)
            .field("key_token", &"<redacted>")
            .field("bucket_id", &self.bucket_id)
            .field("auth_url", &self.auth_url)
            .field("request_timeout", &self.request_timeout)
            .field("session_policy", &self.session_policy)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub retry: RetryPolicy,
    pub max_body_bytes: usize,
    pub deadline: Option<Duration>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
                log_format: LogFormat::Pretty,
            },
            b2: B2Config {
                key_id: String::new(),
                key_token: String::new(),
                bucket_id: String::new(),
                auth_url: DEFAULT_AUTH_URL.to_string(),
                request_timeout: None,
                session_policy: SessionPolicy::Eager,
            },
            upload: UploadConfig {
                retry: RetryPolicy::default(),
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
                deadline: None,
            },
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            server: ServerConfig {
                bind: args.bind,
                log_format: args.log_format,
            },
            b2: B2Config {
                key_id: args.b2_key_id,
                key_token: args.b2_key_token,
                bucket_id: args.b2_bucket_id,
                auth_url: args.b2_auth_url,
                request_timeout: args.request_timeout_secs.map(Duration::from_secs),
                session_policy: args.session_policy.into(),
            },
            upload: UploadConfig {
                retry: RetryPolicy {
                    max_attempts: args.upload_attempts,
                    backoff: Duration::from_millis(args.retry_backoff_ms),
                },
                max_body_bytes: args.max_body_bytes,
                deadline: args.upload_deadline_secs.map(Duration::from_secs),
            },
        }
    }
}

impl Config {
    /// Parse flags and environment
    pub fn from_args() -> Self {
        Args::parse().into()
    }

    /// Check settings the server cannot start without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.b2.key_id.is_empty() {
            return Err(ConfigError::Missing("ARCHIVIST_B2_KEY_ID"));
        }
        if self.b2.key_token.is_empty() {
            return Err(ConfigError::Missing("ARCHIVIST_B2_KEY_TOKEN"));
        }
        if self.b2.bucket_id.is_empty() {
            return Err(ConfigError::Missing("ARCHIVIST_B2_BUCKET_ID"));
        }
        if self.upload.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "ARCHIVIST_UPLOAD_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn api_config(&self) -> HttpB2ApiConfig {
        HttpB2ApiConfig {
            auth_url: self.b2.auth_url.clone(),
            request_timeout: self.b2.request_timeout,
        }
    }
}
