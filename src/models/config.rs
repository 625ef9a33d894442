//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation job behavior
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Carrier API endpoints and credential names
    #[serde(default)]
    pub carriers: CarriersConfig,

    /// Notification transport
    #[serde(default)]
    pub mail: MailConfig,

    /// Time-based trigger
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// On-demand HTTP trigger
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store backend
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("SHIPTRACK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.tracker.timeout_secs = secs;
        }
        if let Some(n) = lookup("SHIPTRACK_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.tracker.max_concurrent = n;
        }
        if let Some(from) = lookup("MAIL_FROM").filter(|v| !v.trim().is_empty()) {
            self.mail.from = from;
        }
        if let Some(bucket) = lookup("S3_BUCKET").filter(|v| !v.trim().is_empty()) {
            self.storage.bucket = bucket;
        }
        if let Some(prefix) = lookup("S3_PREFIX") {
            self.storage.prefix = prefix;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.user_agent.trim().is_empty() {
            return Err(AppError::validation("tracker.user_agent is empty"));
        }
        if self.tracker.timeout_secs == 0 {
            return Err(AppError::validation("tracker.timeout_secs must be > 0"));
        }
        if self.tracker.max_concurrent == 0 {
            return Err(AppError::validation("tracker.max_concurrent must be > 0"));
        }
        for (name, endpoint) in [
            ("carriers.maersk", &self.carriers.maersk),
            ("carriers.hmm", &self.carriers.hmm),
        ] {
            url::Url::parse(&endpoint.base_url).map_err(|e| {
                AppError::validation(format!("{name}.base_url is invalid: {e}"))
            })?;
            if endpoint.api_key_env.trim().is_empty() {
                return Err(AppError::validation(format!("{name}.api_key_env is empty")));
            }
        }
        url::Url::parse(&self.mail.base_url)
            .map_err(|e| AppError::validation(format!("mail.base_url is invalid: {e}")))?;
        if !self.mail.from.contains('@') {
            return Err(AppError::validation("mail.from is not an email address"));
        }
        if self.server.secret_env.trim().is_empty() {
            return Err(AppError::validation("server.secret_env is empty"));
        }
        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.trim().is_empty() {
            return Err(AppError::validation("storage.bucket is required for s3"));
        }
        #[cfg(feature = "server")]
        crate::trigger::CronSchedule::from_config(&self.schedule)?;
        Ok(())
    }
}

/// Reconciliation job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// User-Agent header for carrier requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-call timeout for carrier requests in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum shipments reconciled at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Skip status writes that move backwards along the happy path
    #[serde(default)]
    pub reject_regressions: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
            reject_regressions: false,
        }
    }
}

/// Per-carrier API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarriersConfig {
    #[serde(default = "defaults::maersk")]
    pub maersk: CarrierEndpoint,

    #[serde(default = "defaults::hmm")]
    pub hmm: CarrierEndpoint,
}

impl Default for CarriersConfig {
    fn default() -> Self {
        Self {
            maersk: defaults::maersk(),
            hmm: defaults::hmm(),
        }
    }
}

/// Base URL and credential lookup for one carrier API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierEndpoint {
    pub base_url: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl CarrierEndpoint {
    /// Resolve the API key from the environment.
    pub fn api_key(&self) -> Option<String> {
        secret_from_env(&self.api_key_env)
    }
}

/// Mail transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "defaults::mail_base_url")]
    pub base_url: String,

    /// Sender address
    #[serde(default = "defaults::mail_from")]
    pub from: String,

    #[serde(default = "defaults::mail_api_key_env")]
    pub api_key_env: String,
}

impl MailConfig {
    pub fn api_key(&self) -> Option<String> {
        secret_from_env(&self.api_key_env)
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::mail_base_url(),
            from: defaults::mail_from(),
            api_key_env: defaults::mail_api_key_env(),
        }
    }
}

/// Cron schedule for the in-process trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Six-field cron expression (sec min hour day month weekday)
    #[serde(default = "defaults::cron")]
    pub cron: String,

    /// IANA timezone the expression is evaluated in
    #[serde(default = "defaults::timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: defaults::cron(),
            timezone: defaults::timezone(),
        }
    }
}

/// On-demand HTTP trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::bind")]
    pub bind: String,

    /// Name of the environment variable holding the shared secret
    #[serde(default = "defaults::secret_env")]
    pub secret_env: String,
}

impl ServerConfig {
    pub fn secret(&self) -> Option<String> {
        secret_from_env(&self.secret_env)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::bind(),
            secret_env: defaults::secret_env(),
        }
    }
}

/// Which document store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the local backend
    #[serde(default = "defaults::storage_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub bucket: String,

    #[serde(default = "defaults::prefix")]
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: defaults::storage_root(),
            bucket: String::new(),
            prefix: defaults::prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

fn secret_from_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

mod defaults {
    use std::path::PathBuf;

    use super::CarrierEndpoint;

    // Tracker defaults
    pub fn user_agent() -> String {
        "shiptrack/0.1 (+https://shiptrack.app)".into()
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn max_concurrent() -> usize {
        8
    }

    // Carrier defaults
    pub fn maersk() -> CarrierEndpoint {
        CarrierEndpoint {
            base_url: "https://api.maersk.com".into(),
            api_key_env: "MAERSK_API_KEY".into(),
        }
    }
    pub fn hmm() -> CarrierEndpoint {
        CarrierEndpoint {
            base_url: "https://api.hmm21.com".into(),
            api_key_env: "HMM_API_KEY".into(),
        }
    }

    // Mail defaults
    pub fn mail_base_url() -> String {
        "https://api.sendgrid.com".into()
    }
    pub fn mail_from() -> String {
        "no-reply@shiptrack.app".into()
    }
    pub fn mail_api_key_env() -> String {
        "SENDGRID_API_KEY".into()
    }

    // Trigger defaults
    pub fn cron() -> String {
        "0 */30 * * * *".into()
    }
    pub fn timezone() -> String {
        "Asia/Seoul".into()
    }
    pub fn bind() -> String {
        "0.0.0.0:8080".into()
    }
    pub fn secret_env() -> String {
        "CRON_SECRET".into()
    }

    // Storage defaults
    pub fn storage_root() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn prefix() -> String {
        "shiptrack".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracker.timeout_secs, 10);
        assert_eq!(config.schedule.timezone, "Asia/Seoul");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tracker]
            max_concurrent = 2

            [carriers.hmm]
            base_url = "http://127.0.0.1:9000"
            api_key_env = "TEST_HMM_KEY"
            "#,
        )
        .unwrap();

        assert_eq!(config.tracker.max_concurrent, 2);
        assert_eq!(config.tracker.timeout_secs, 10);
        assert_eq!(config.carriers.hmm.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.carriers.maersk.api_key_env, "MAERSK_API_KEY");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.tracker.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.carriers.maersk.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SHIPTRACK_TIMEOUT_SECS", "3"),
            ("MAIL_FROM", "ops@example.com"),
            ("SHIPTRACK_MAX_CONCURRENT", "not-a-number"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.tracker.timeout_secs, 3);
        assert_eq!(config.mail.from, "ops@example.com");
        assert_eq!(config.tracker.max_concurrent, 8);
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let config: Config = toml::from_str(include_str!("../../storage/config.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.cron, "0 */30 * * * *");
        assert_eq!(config.storage.backend, StorageBackend::Local);
    }
}
