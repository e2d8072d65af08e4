//! OutClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutClawConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub teardown: TeardownConfig,
}

impl OutClawConfig {
    /// Load config from the default path (~/.outclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OutClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| OutClawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| OutClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the OutClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outclaw")
    }
}

/// Orchestration core tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Backoff applied when the executor fails transiently without giving
    /// its own retry delay.
    #[serde(default = "default_retry_ms")]
    pub default_retry_ms: u64,
    /// Priority assigned to filler ("plug") items. Must be negative.
    #[serde(default = "default_plug_priority")]
    pub plug_priority: i32,
    /// Plug loop sleeps a random interval in this range between actions.
    #[serde(default = "default_plug_min_sleep")]
    pub plug_min_sleep_secs: u64,
    #[serde(default = "default_plug_max_sleep")]
    pub plug_max_sleep_secs: u64,
    /// Bounded wait for a plug action to complete before moving on.
    #[serde(default = "default_plug_timeout")]
    pub plug_timeout_secs: u64,
    /// Checkpoint database path (throttler queues + restrictions).
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_retry_ms() -> u64 {
    60_000
}
fn default_plug_priority() -> i32 {
    -10
}
fn default_plug_min_sleep() -> u64 {
    20 * 60
}
fn default_plug_max_sleep() -> u64 {
    60 * 60
}
fn default_plug_timeout() -> u64 {
    15 * 60
}
fn default_db_path() -> String {
    "~/.outclaw/scheduler.db".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_retry_ms: default_retry_ms(),
            plug_priority: default_plug_priority(),
            plug_min_sleep_secs: default_plug_min_sleep(),
            plug_max_sleep_secs: default_plug_max_sleep(),
            plug_timeout_secs: default_plug_timeout(),
            db_path: default_db_path(),
        }
    }
}

/// Enrichment resolver + provider endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Providers in waterfall order (first = preferred).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Loop passes before the resolver snapshots and restarts itself.
    #[serde(default = "default_iteration_budget")]
    pub iteration_budget: u32,
    /// Snapshot file for the pending queue + cooldown table.
    #[serde(default = "default_enrich_snapshot")]
    pub snapshot_path: String,
}

fn default_iteration_budget() -> u32 {
    256
}
fn default_enrich_snapshot() -> String {
    "~/.outclaw/enrich-queue.json".into()
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            iteration_budget: default_iteration_budget(),
            snapshot_path: default_enrich_snapshot(),
        }
    }
}

/// One HTTP enrichment provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
}

/// Outbound SMTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    /// Fixed pacing between outbound sends.
    #[serde(default = "default_email_pacing")]
    pub pacing_secs: u64,
    #[serde(default = "default_email_snapshot")]
    pub snapshot_path: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_email_pacing() -> u64 {
    30
}
fn default_email_snapshot() -> String {
    "~/.outclaw/email-queue.json".into()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            pacing_secs: default_email_pacing(),
            snapshot_path: default_email_snapshot(),
        }
    }
}

/// Subscription teardown pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownConfig {
    #[serde(default = "default_teardown_pacing")]
    pub pacing_secs: u64,
    #[serde(default = "default_teardown_snapshot")]
    pub snapshot_path: String,
}

fn default_teardown_pacing() -> u64 {
    5
}
fn default_teardown_snapshot() -> String {
    "~/.outclaw/teardown-queue.json".into()
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            pacing_secs: default_teardown_pacing(),
            snapshot_path: default_teardown_snapshot(),
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
