use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    /// Service root, the API key segment included; `/latest/{base}` is appended.
    pub base_url: String,
    pub base_currency: String,
    pub timeout_secs: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            base_url: "https://v6.exchangerate-api.com/v6/YOUR-API-KEY".to_string(),
            base_currency: "USD".to_string(),
            timeout_secs: 30,
            retries: 3,
            retry_delay_ms: 5000,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { interval_secs: 60 }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub channel: String,
    pub timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            channel: "currency.updates".to_string(),
            timeout_ms: 2000,
        }
    }
}

impl BusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub send_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            send_timeout_ms: 5000,
        }
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SeedRate {
    pub base_currency: String,
    pub target_currency: String,
    pub rate: f64,
}

fn default_seed_rates() -> Vec<SeedRate> {
    [("EUR", 0.92), ("RUB", 92.5), ("JPY", 149.3)]
        .into_iter()
        .map(|(target, rate)| SeedRate {
            base_currency: "USD".to_string(),
            target_currency: target.to_string(),
            rate,
        })
        .collect()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default = "default_seed_rates")]
    pub seed_rates: Vec<SeedRate>,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig::default(),
            source: SourceConfig::default(),
            scheduler: SchedulerConfig::default(),
            bus: BusConfig::default(),
            broadcast: BroadcastConfig::default(),
            seed_rates: default_seed_rates(),
            data_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "ratesync", "ratesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "ratesync", "ratesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
server:
  port: 9000
source:
  base_url: "http://example.com/v6/key"
  base_currency: "EUR"
  timeout_secs: 5
scheduler:
  interval_secs: 15
bus:
  url: "redis://bus:6379"
  channel: "fx.changes"
seed_rates:
  - base_currency: "USD"
    target_currency: "CHF"
    rate: 0.88
data_path: "/tmp/ratesync"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.source.base_url, "http://example.com/v6/key");
        assert_eq!(config.source.base_currency, "EUR");
        assert_eq!(config.source.timeout(), Duration::from_secs(5));
        assert_eq!(config.source.retries, 3);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(15));
        assert_eq!(config.bus.url, "redis://bus:6379");
        assert_eq!(config.bus.channel, "fx.changes");
        assert_eq!(config.bus.timeout_ms, 2000);
        assert_eq!(config.broadcast.send_timeout_ms, 5000);
        assert_eq!(config.seed_rates.len(), 1);
        assert_eq!(config.seed_rates[0].target_currency, "CHF");
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/ratesync")
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.bus.channel, "currency.updates");
        assert_eq!(config.source.base_currency, "USD");
        assert_eq!(config.seed_rates, default_seed_rates());
        assert!(config.data_path.is_none());
    }
}
