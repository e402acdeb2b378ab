//! Server configuration, loaded from environment variables at startup.

use std::str::FromStr;
use std::time::Duration;

use batcher_core::{ExpansionLimits, FailurePolicy, RecoveryPolicy, SchedulerConfig};

/// Runtime configuration for batcher-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://batcher.db"`). `sqlite::memory:`
    /// keeps everything in RAM for the lifetime of the process.
    pub database_url: String,

    /// Pool size for file-backed databases.
    pub db_max_connections: u32,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for daily-rotated log files; stdout when unset.
    pub log_dir: Option<String>,

    /// Comma-separated CORS origins; any origin when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve `/api-docs/openapi.json`.
    pub enable_docs: bool,

    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
    pub max_combinations: usize,

    /// What to do with tasks left `running` by a previous process.
    pub recovery: RecoveryPolicy,

    /// Base URL of the prompt server jobs are submitted to.
    pub engine_url: String,
    pub engine_poll_interval: Duration,
    pub engine_timeout: Duration,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("BATCH_BIND", "0.0.0.0:3000"),
            database_url: env_or("BATCH_DATABASE_URL", "sqlite://batcher.db"),
            db_max_connections: parse_env("BATCH_DB_MAX_CONNECTIONS", 4),
            log_level: env_or("BATCH_LOG", "info"),
            log_json: env_flag("BATCH_LOG_JSON", false),
            log_dir: env_opt("BATCH_LOG_DIR"),
            cors_allowed_origins: env_opt("BATCH_CORS_ORIGINS"),
            enable_docs: env_flag("BATCH_ENABLE_DOCS", true),
            poll_interval: Duration::from_millis(parse_env("BATCH_POLL_INTERVAL_MS", 2000)),
            failure_policy: parse_env("BATCH_FAILURE_POLICY", FailurePolicy::FailFast),
            max_combinations: parse_env("BATCH_MAX_COMBINATIONS", 10_000),
            recovery: parse_env("BATCH_RECOVERY", RecoveryPolicy::Fail),
            engine_url: env_or("BATCH_ENGINE_URL", "http://127.0.0.1:8188"),
            engine_poll_interval: Duration::from_millis(parse_env("BATCH_ENGINE_POLL_MS", 1000)),
            engine_timeout: Duration::from_secs(parse_env("BATCH_ENGINE_TIMEOUT_SECS", 300)),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: self.poll_interval,
            failure_policy: self.failure_policy,
            ..Default::default()
        }
    }

    pub fn limits(&self) -> ExpansionLimits {
        ExpansionLimits {
            max_combinations: self.max_combinations,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            database_url: "sqlite://batcher.db".to_owned(),
            db_max_connections: 4,
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            cors_allowed_origins: None,
            enable_docs: true,
            poll_interval: Duration::from_secs(2),
            failure_policy: FailurePolicy::FailFast,
            max_combinations: 10_000,
            recovery: RecoveryPolicy::Fail,
            engine_url: "http://127.0.0.1:8188".to_owned(),
            engine_poll_interval: Duration::from_secs(1),
            engine_timeout: Duration::from_secs(300),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn policies_parse_from_their_env_spelling() {
        assert_eq!("continue".parse::<FailurePolicy>().unwrap(), FailurePolicy::ContinueOnFailure);
        assert_eq!("fail-fast".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailFast);
        assert_eq!("requeue".parse::<RecoveryPolicy>().unwrap(), RecoveryPolicy::Requeue);
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler().poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.limits().max_combinations, 10_000);
        assert_eq!(cfg.engine_timeout, Duration::from_secs(300));
        assert_eq!(cfg.recovery, RecoveryPolicy::Fail);
    }
}
