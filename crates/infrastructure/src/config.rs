use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    pub database_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub gc_interval: std::time::Duration,
}

fn default_batch_size() -> u32 {
    100
}
fn default_flush_interval() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}
fn default_gc_interval() -> std::time::Duration {
    std::time::Duration::from_secs(3600)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutomationSettings {
    #[serde(with = "humantime_serde", default = "default_stats_refresh_interval")]
    pub stats_refresh_interval: std::time::Duration,
}

fn default_stats_refresh_interval() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            stats_refresh_interval: default_stats_refresh_interval(),
        }
    }
}

/// Root configuration for one edge-agent process. Built with a
/// layered loader: hardcoded defaults, then an optional file, then
/// `GATEWAY__`-prefixed environment variables, the last source
/// winning on conflicts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub agent_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub mqtt: MqttConfig,
    pub buffer: BufferConfig,
    #[serde(default)]
    pub automation: AutomationSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Loads configuration from `<config_dir>/default.{toml,yaml,...}`
    /// (required), an optional `<config_dir>/<RUN_MODE>` override, and
    /// `GATEWAY__`-prefixed environment variables such as
    /// `GATEWAY__MQTT__BROKER_HOST=10.0.0.1`.
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let source = Config::builder()
            .set_default("log_level", "info")?
            .set_default("buffer.batch_size", 100)?
            .set_default("buffer.flush_interval", "30s")?
            .set_default("buffer.gc_interval", "1h")?
            .set_default("automation.stats_refresh_interval", "30s")?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(true))
            .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
            .add_source(Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;

        source.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_level_is_info() {
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn default_automation_settings_is_thirty_seconds() {
        assert_eq!(
            AutomationSettings::default().stats_refresh_interval,
            std::time::Duration::from_secs(30)
        );
    }
}
