//! Engine configuration.
//!
//! Values are read once at startup, either from the environment
//! ([`EngineConfig::from_env`]) or from a JSON document
//! ([`EngineConfig::from_json`]). Anything not supplied keeps its default.

use chrono::NaiveTime;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Resource;
use crate::preopen::PreOpenWindow;
use crate::timeout::{TimeoutError, TimeoutPolicy};

pub const ENV_CAPTCHA_SECRET: &str = "CAPTCHA_SECRET";
pub const ENV_CAPTCHA_TTL_SECONDS: &str = "CAPTCHA_TTL_SECONDS";
pub const ENV_COUNTER_ADDR: &str = "COUNTER_ADDR";
pub const ENV_COUNTER_TIMEOUT_MS: &str = "COUNTER_TIMEOUT_MS";
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
pub const ENV_GATE_START_TIME: &str = "GATE_START_TIME";
pub const ENV_PREOPEN_OFFSET_MINUTES: &str = "PREOPEN_OFFSET_MINUTES";
pub const ENV_MIN_PREOPEN_SIZE_GRAM: &str = "MIN_PREOPEN_SIZE_GRAM";

/// Secret used when none is configured. Only fit for development.
pub const DEV_SECRET: &str = "dev-secret";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl fmt::Display) -> Self {
        Self::Invalid { key, reason: reason.to_string() }
    }
}

impl From<TimeoutError> for ConfigError {
    fn from(err: TimeoutError) -> Self {
        Self::invalid(ENV_COUNTER_TIMEOUT_MS, err)
    }
}

/// Pre-open issuance window and its extra rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreOpenConfig {
    /// Local gate opening time, `HH:MM`.
    pub gate_start: String,
    /// Length of the window that ends at `gate_start`.
    pub offset_minutes: u32,
    /// Smallest requested size admitted during pre-open.
    pub min_size_gram: f64,
    /// Offset of local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Only resources in this region take pre-open tickets.
    pub region: String,
}

impl Default for PreOpenConfig {
    fn default() -> Self {
        Self {
            gate_start: "07:00".to_string(),
            offset_minutes: 10,
            min_size_gram: 5.0,
            utc_offset_minutes: 7 * 60,
            region: "jabodetabek".to_string(),
        }
    }
}

impl PreOpenConfig {
    /// Parsed `gate_start`.
    pub fn gate_start_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hh_mm(&self.gate_start)
            .ok_or_else(|| ConfigError::invalid(ENV_GATE_START_TIME, "expected HH:MM"))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.offset_minutes) * 60)
    }
}

fn parse_hh_mm(raw: &str) -> Option<NaiveTime> {
    let (h, m) = raw.trim().split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub captcha_secret: String,
    pub captcha_ttl_seconds: u64,
    /// Primary counter backend address; `None` runs on in-process counters.
    pub counter_addr: Option<String>,
    pub counter_timeout_ms: u64,
    pub database_path: PathBuf,
    pub resources: Vec<Resource>,
    pub preopen: PreOpenConfig,
    /// Require a math challenge on regular ticket issuance.
    pub require_issue_challenge: bool,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("captcha_secret", &"<REDACTED>")
            .field("captcha_ttl_seconds", &self.captcha_ttl_seconds)
            .field("counter_addr", &self.counter_addr)
            .field("counter_timeout_ms", &self.counter_timeout_ms)
            .field("database_path", &self.database_path)
            .field("resources", &self.resources)
            .field("preopen", &self.preopen)
            .field("require_issue_challenge", &self.require_issue_challenge)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            captcha_secret: DEV_SECRET.to_string(),
            captcha_ttl_seconds: 300,
            counter_addr: None,
            counter_timeout_ms: 500,
            database_path: PathBuf::from("database.json"),
            resources: default_resources(),
            preopen: PreOpenConfig::default(),
            require_issue_challenge: false,
        }
    }
}

/// The four stock pickup locations.
pub fn default_resources() -> Vec<Resource> {
    [
        ("graha-dipta", "Butik Emas LM - Graha Dipta", 30),
        ("juanda", "Butik Emas LM - Juanda", 25),
        ("gedung-antam", "Butik Emas LM - Gedung Antam", 40),
        ("setiabudi-one", "Butik Emas LM - Setiabudi One", 20),
    ]
    .into_iter()
    .map(|(id, name, capacity)| Resource::new(id, name, "jabodetabek", capacity))
    .collect()
}

impl EngineConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; blank values count as unset.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(secret) = get(ENV_CAPTCHA_SECRET) {
            cfg.captcha_secret = secret;
        }
        if let Some(raw) = get(ENV_CAPTCHA_TTL_SECONDS) {
            cfg.captcha_ttl_seconds = parse_positive(ENV_CAPTCHA_TTL_SECONDS, &raw)?;
        }
        if let Some(addr) = get(ENV_COUNTER_ADDR) {
            cfg.counter_addr = Some(addr);
        }
        if let Some(raw) = get(ENV_COUNTER_TIMEOUT_MS) {
            cfg.counter_timeout_ms = parse_positive(ENV_COUNTER_TIMEOUT_MS, &raw)?;
        }
        if let Some(path) = get(ENV_DATABASE_PATH) {
            cfg.database_path = PathBuf::from(path);
        }
        if let Some(start) = get(ENV_GATE_START_TIME) {
            cfg.preopen.gate_start = start;
        }
        if let Some(raw) = get(ENV_PREOPEN_OFFSET_MINUTES) {
            cfg.preopen.offset_minutes = parse_positive(ENV_PREOPEN_OFFSET_MINUTES, &raw)?;
        }
        if let Some(raw) = get(ENV_MIN_PREOPEN_SIZE_GRAM) {
            cfg.preopen.min_size_gram = raw
                .parse::<f64>()
                .map_err(|e| ConfigError::invalid(ENV_MIN_PREOPEN_SIZE_GRAM, e))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.captcha_secret.is_empty() {
            return Err(ConfigError::invalid(ENV_CAPTCHA_SECRET, "must not be empty"));
        }
        if self.captcha_ttl_seconds == 0 {
            return Err(ConfigError::invalid(ENV_CAPTCHA_TTL_SECONDS, "must be positive"));
        }
        self.counter_timeout()?;
        PreOpenWindow::from_config(&self.preopen)?;
        if !(self.preopen.min_size_gram.is_finite() && self.preopen.min_size_gram > 0.0) {
            return Err(ConfigError::invalid(ENV_MIN_PREOPEN_SIZE_GRAM, "must be positive"));
        }
        let mut ids = std::collections::HashSet::new();
        for resource in &self.resources {
            if resource.id.is_empty() || !ids.insert(resource.id.as_str()) {
                return Err(ConfigError::invalid(
                    "resources",
                    format!("empty or duplicate id '{}'", resource.id),
                ));
            }
        }
        if self.captcha_secret == DEV_SECRET {
            tracing::warn!(target: "ticketgate::config", "using the development captcha secret");
        }
        Ok(())
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.captcha_ttl_seconds)
    }

    pub fn counter_timeout(&self) -> Result<TimeoutPolicy, ConfigError> {
        Ok(TimeoutPolicy::new(Duration::from_millis(self.counter_timeout_ms))?)
    }
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let value = raw.parse::<T>().map_err(|e| ConfigError::invalid(key, e))?;
    if value <= T::default() {
        return Err(ConfigError::invalid(key, "must be positive"));
    }
    Ok(value)
}
