//! Bridge configuration, loaded once at startup and immutable afterwards.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("no pumps configured")]
    NoPumps,

    #[error("duplicate pump id '{0}'")]
    DuplicatePumpId(String),

    #[error("pump '{id}': flow range {min}..={max} is invalid")]
    BadFlowRange { id: String, min: u8, max: u8 },

    #[error("pump '{id}': frequency range {min}..={max} is invalid")]
    BadFrequencyRange { id: String, min: u8, max: u8 },
}

/// MQTT broker connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "wavebridge".to_string()
}

/// Bridge-wide behavior knobs. All durations in seconds in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_root_topic")]
    pub root_topic: String,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    /// Keep-alive window: a silent link is declared dead after this long.
    /// Operational tuning parameter, deliberately conservative by default.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_status_query_interval")]
    pub status_query_interval_secs: u64,
    #[serde(default = "default_feed_duration")]
    pub feed_duration_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            root_topic: default_root_topic(),
            discovery_prefix: default_discovery_prefix(),
            command_timeout_secs: default_command_timeout(),
            auth_timeout_secs: default_auth_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            status_query_interval_secs: default_status_query_interval(),
            feed_duration_secs: default_feed_duration(),
            refresh_interval_secs: default_refresh_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl BridgeSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn status_query_interval(&self) -> Duration {
        Duration::from_secs(self.status_query_interval_secs)
    }

    pub fn feed_duration(&self) -> Duration {
        Duration::from_secs(self.feed_duration_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_root_topic() -> String {
    "wavebridge".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_command_timeout() -> u64 {
    5
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_status_query_interval() -> u64 {
    30
}

fn default_feed_duration() -> u64 {
    600
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    5
}

/// One configured pump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Human-readable name, shown by the automation hub.
    pub name: String,
    /// Transport address of the pump's link endpoint.
    pub address: String,
    /// Topic-safe identifier; derived from `name` when omitted.
    #[serde(default)]
    pub id: String,
    /// Login passcode quirk; most firmware revisions accept 0.
    #[serde(default)]
    pub passcode: u32,
    #[serde(default = "default_flow_min")]
    pub flow_min: u8,
    #[serde(default = "default_flow_max")]
    pub flow_max: u8,
    #[serde(default = "default_frequency_min")]
    pub frequency_min: u8,
    #[serde(default = "default_frequency_max")]
    pub frequency_max: u8,
}

fn default_flow_min() -> u8 {
    30
}

fn default_flow_max() -> u8 {
    100
}

fn default_frequency_min() -> u8 {
    5
}

fn default_frequency_max() -> u8 {
    20
}

/// Lowercase, with spaces and dashes collapsed to underscores.
pub fn normalize_id(name: &str) -> String {
    name.to_lowercase().replace([' ', '-'], "_")
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub pumps: Vec<PumpConfig>,
}

impl BridgeConfig {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: BridgeConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.finalize()?;
        info!(
            "Loaded configuration: {} pump(s), broker {}:{}",
            config.pumps.len(),
            config.mqtt.host,
            config.mqtt.port
        );
        Ok(config)
    }

    fn finalize(&mut self) -> Result<(), ConfigError> {
        if self.pumps.is_empty() {
            return Err(ConfigError::NoPumps);
        }
        for pump in &mut self.pumps {
            if pump.id.is_empty() {
                pump.id = normalize_id(&pump.name);
            }
            if pump.flow_min > pump.flow_max || pump.flow_max > 100 {
                return Err(ConfigError::BadFlowRange {
                    id: pump.id.clone(),
                    min: pump.flow_min,
                    max: pump.flow_max,
                });
            }
            if pump.frequency_min > pump.frequency_max || pump.frequency_min == 0 {
                return Err(ConfigError::BadFrequencyRange {
                    id: pump.id.clone(),
                    min: pump.frequency_min,
                    max: pump.frequency_max,
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for pump in &self.pumps {
            if !seen.insert(pump.id.as_str()) {
                return Err(ConfigError::DuplicatePumpId(pump.id.clone()));
            }
        }
        Ok(())
    }
}

/// Commented starter config written when none exists yet.
pub const EXAMPLE_CONFIG: &str = r#"# Wavebridge configuration

[mqtt]
host = "localhost"          # MQTT broker host
port = 1883                 # MQTT broker port
# username = "bridge"
# password = "secret"
client_id = "wavebridge"

[bridge]
root_topic = "wavebridge"            # state under {root}/{pump}/{field}
discovery_prefix = "homeassistant"   # hub auto-discovery prefix
# idle_timeout_secs = 90             # silent-link watchdog; tune per site

[[pumps]]
name = "Wavemaker 1"
address = "192.168.4.21:8899"        # serial gateway endpoint
# id = "wavemaker_1"                 # derived from name when omitted
# passcode = 0
# flow_min = 30
# flow_max = 100
# frequency_min = 5
# frequency_max = 20

# Add more pumps:
# [[pumps]]
# name = "Wavemaker 2"
# address = "192.168.4.22:8899"
"#;
