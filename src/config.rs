//! Gateway configuration system
//!
//! Configuration is read from a single TOML file. Every section except `[mqtt]`
//! and `[modem]` is optional and falls back to the defaults of the add-on the
//! gateway replaces (broker `core-mosquitto`, counter at `/data/sms_counter.json`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub mqtt: MqttSection,
    pub modem: ModemSection,
    #[serde(default)]
    pub sms: SmsSection,
    #[serde(default)]
    pub status: StatusSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// MQTT broker connection and topic layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Client identifier prefix presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Root of all state and command topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Root of Home Assistant discovery config topics
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// Pause between publishing discovery configs and clearing the message field
    #[serde(default = "default_discovery_settle_ms")]
    pub discovery_settle_ms: u64,
}

fn default_broker_url() -> String {
    "mqtt://core-mosquitto:1883".to_string()
}

fn default_client_id() -> String {
    "sms-gateway".to_string()
}

fn default_topic_prefix() -> String {
    "homeassistant/sensor/sms_gateway".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_discovery_settle_ms() -> u64 {
    1000
}

/// Modem driver settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModemSection {
    /// Serial device path (`/dev/ttyUSB0`) or `tcp://host:port` for a serial bridge
    pub device: String,
    /// Line speed for device nodes; ignored for `tcp://` bridges
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Timeout for a single AT command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// SMS service center number; blank means "use the SIM default"
    #[serde(default)]
    pub smsc_number: String,
    /// Seconds without a successful modem operation before the modem is reported offline
    #[serde(default = "default_offline_timeout")]
    pub offline_timeout_secs: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_command_timeout() -> u64 {
    10
}

fn default_offline_timeout() -> u64 {
    600 // 10 minutes
}

/// Incoming SMS monitoring and sent-counter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmsSection {
    #[serde(default = "default_true")]
    pub monitoring_enabled: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub auto_delete_read_sms: bool,
    #[serde(default)]
    pub cost_per_message: f64,
    #[serde(default = "default_cost_currency")]
    pub cost_currency: String,
    #[serde(default = "default_counter_file")]
    pub counter_file: PathBuf,
}

impl Default for SmsSection {
    fn default() -> Self {
        Self {
            monitoring_enabled: true,
            check_interval_secs: default_check_interval(),
            auto_delete_read_sms: false,
            cost_per_message: 0.0,
            cost_currency: default_cost_currency(),
            counter_file: default_counter_file(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    30
}

fn default_cost_currency() -> String {
    "CZK".to_string()
}

fn default_counter_file() -> PathBuf {
    PathBuf::from("/data/sms_counter.json")
}

/// Periodic signal/network publishing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSection {
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            publish_interval_secs: default_publish_interval(),
        }
    }
}

fn default_publish_interval() -> u64 {
    60
}

/// HTTP health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_health_port(),
        }
    }
}

fn default_health_port() -> u16 {
    8080
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid topic prefix: {0}")]
    InvalidTopicPrefix(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;
        validate_topic_prefix(&self.mqtt.topic_prefix)?;
        validate_topic_prefix(&self.mqtt.discovery_prefix)?;

        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }

        if self.modem.device.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "modem.device must not be empty".to_string(),
            ));
        }

        if self.modem.baud_rate == 0 {
            return Err(ConfigError::InvalidConfig(
                "modem.baud_rate must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("modem.command_timeout_secs", self.modem.command_timeout_secs),
            ("modem.offline_timeout_secs", self.modem.offline_timeout_secs),
            ("sms.check_interval_secs", self.sms.check_interval_secs),
            ("status.publish_interval_secs", self.status.publish_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if !self.sms.cost_per_message.is_finite() || self.sms.cost_per_message < 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "sms.cost_per_message must be a non-negative number, got {}",
                self.sms.cost_per_message
            )));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Configured SMSC number, `None` when blank
    pub fn smsc_number(&self) -> Option<&str> {
        let trimmed = self.modem.smsc_number.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
discovery_settle_ms = 0

[modem]
device = "/dev/null"

[sms]
counter_file = "/tmp/sms-gateway-test-counter.json"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Broker URLs need an `mqtt` or `mqtts` scheme and a host
fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(broker_url)
        .map_err(|e| ConfigError::InvalidConfig(format!("Invalid broker URL '{broker_url}': {e}")))?;
    if !matches!(url.scheme(), "mqtt" | "mqtts") || url.host_str().is_none() {
        return Err(ConfigError::InvalidConfig(format!(
            "Broker URL '{broker_url}' must use mqtt:// or mqtts:// with a host"
        )));
    }
    Ok(())
}

/// Topic roots must be non-empty and free of MQTT wildcards
fn validate_topic_prefix(prefix: &str) -> Result<(), ConfigError> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() || trimmed.contains(|c| c == '+' || c == '#') {
        return Err(ConfigError::InvalidTopicPrefix(format!(
            "Topic prefix '{prefix}' must be non-empty and contain no wildcards"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
[mqtt]

[modem]
device = "/dev/ttyUSB0"
"#,
        )
        .unwrap();

        assert_eq!(config.mqtt.broker_url, "mqtt://core-mosquitto:1883");
        assert_eq!(config.mqtt.topic_prefix, "homeassistant/sensor/sms_gateway");
        assert_eq!(config.mqtt.discovery_prefix, "homeassistant");
        assert_eq!(config.modem.offline_timeout_secs, 600);
        assert_eq!(config.modem.command_timeout_secs, 10);
        assert_eq!(config.modem.baud_rate, 115_200);
        assert!(config.sms.monitoring_enabled);
        assert_eq!(config.sms.check_interval_secs, 30);
        assert!(!config.sms.auto_delete_read_sms);
        assert_eq!(config.sms.counter_file, PathBuf::from("/data/sms_counter.json"));
        assert_eq!(config.status.publish_interval_secs, 60);
        assert!(config.health.enabled);
        assert_eq!(config.health.port, 8080);
    }

    #[test]
    fn test_smsc_number_blank_is_none() {
        let mut config = GatewayConfig::test_config();
        config.modem.smsc_number = "   ".to_string();
        assert_eq!(config.smsc_number(), None);

        config.modem.smsc_number = " +420603052000 ".to_string();
        assert_eq!(config.smsc_number(), Some("+420603052000"));
    }

    #[test]
    fn test_wildcard_prefix_rejected() {
        let mut config = GatewayConfig::test_config();
        config.mqtt.topic_prefix = "homeassistant/+/sms".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTopicPrefix(_))
        ));
    }

    #[test]
    fn test_broker_url_scheme_checked() {
        let mut config = GatewayConfig::test_config();
        config.mqtt.broker_url = "http://localhost:1883".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        config.mqtt.broker_url = "mqtts://broker.example.com:8883".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = GatewayConfig::test_config();
        config.sms.check_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sms.check_interval_secs"));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let mut config = GatewayConfig::test_config();
        config.sms.cost_per_message = -0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = GatewayConfig::test_config();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed = GatewayConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
