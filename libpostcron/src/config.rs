//! Configuration management for Postcron

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/postcron/posts.db".to_string(),
        }
    }
}

/// Dispatcher tuning. Durations are whole seconds unless the name says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub tick_interval: u64,
    pub claim_timeout: u64,
    pub publish_timeout: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_concurrency: usize,
    pub enrich_media: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: 60,
            claim_timeout: 600,
            publish_timeout: 30,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            max_concurrency: 4,
            enrich_media: true,
        }
    }
}

impl DispatcherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout)
    }

    /// Backoff before retry number `attempt` (1-based attempt that just failed)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    /// Longest a claimed post can stay `publishing` in a healthy run: every
    /// attempt timing out, every backoff, then the enrichment lookup.
    pub fn max_claim_duration(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = self.publish_timeout().saturating_mul(attempts);
        for attempt in 1..attempts {
            total = total.saturating_add(self.retry_delay(attempt));
        }
        if self.enrich_media {
            total = total.saturating_add(self.publish_timeout());
        }
        total
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dispatcher.tick_interval", self.tick_interval),
            ("dispatcher.claim_timeout", self.claim_timeout),
            ("dispatcher.publish_timeout", self.publish_timeout),
            ("dispatcher.max_attempts", u64::from(self.max_attempts)),
            ("dispatcher.max_concurrency", self.max_concurrency as u64),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }

        // A shorter claim timeout lets another run expire a claim that is still publishing
        let max_claim = self.max_claim_duration();
        if Duration::from_secs(self.claim_timeout) <= max_claim {
            return Err(ConfigError::InvalidValue {
                field: "dispatcher.claim_timeout".to_string(),
                reason: format!(
                    "must be longer than a full publish attempt ({}s with these settings)",
                    max_claim.as_secs_f64().ceil() as u64
                ),
            }
            .into());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Base URL of the web application that publishes on our behalf
    pub app_url: String,
    /// Shared key sent as `x-api-key`
    pub api_key: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:3000".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4000".to_string(),
        }
    }
}

/// First set, non-empty variable among `names`
fn env_var(names: &[&str]) -> Option<(String, String)> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| (name.to_string(), v))
    })
}

impl Config {
    /// Load configuration from the default location, then apply env overrides
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = Self::load_from_path(&config_path)?;
        config.apply_env_overrides()?;
        config.dispatcher.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Environment wins over the file.
    ///
    /// `POSTCRON_DB_PATH`, `POSTCRON_APP_URL` (or `APP_URL`),
    /// `POSTCRON_API_KEY` (or `CRON_API_KEY`), `PORT` (or `CRON_PORT`).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some((_, path)) = env_var(&["POSTCRON_DB_PATH"]) {
            self.database.path = path;
        }

        if let Some((_, url)) = env_var(&["POSTCRON_APP_URL", "APP_URL"]) {
            self.publisher.app_url = url;
        }

        if let Some((_, key)) = env_var(&["POSTCRON_API_KEY", "CRON_API_KEY"]) {
            self.publisher.api_key = Some(key);
        }

        if let Some((name, port)) = env_var(&["PORT", "CRON_PORT"]) {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: name,
                reason: format!("'{}' is not a valid port", port),
            })?;
            let host = self
                .server
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            self.server.listen = format!("{}:{}", host, port);
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::InvalidValue {
                field: "config".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTCRON_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postcron").join("config.toml"))
}
