//! SMS Gateway - GSM modem to MQTT bridge
//!
//! Exposes a GSM modem to an MQTT broker as a set of Home Assistant entities:
//! send SMS from a JSON command or from text fields and a button, publish
//! incoming SMS, and report signal, network, SIM and modem health.
//!
//! # Overview
//!
//! - [`modem`]: the modem boundary plus an AT-command driver and PDU codec
//! - [`transport`]: broker abstraction and its `rumqttc` implementation
//! - [`protocol`]: topic layout, JSON payloads and discovery configs
//! - [`gateway`]: connectivity tracking, the sent counter, command handling,
//!   SMS polling and the lifecycle tying them to the broker connection
//!
//! # Quick Start
//!
//! ```no_run
//! use sms_gateway::config::GatewayConfig;
//! use sms_gateway::gateway::GatewayLifecycle;
//! use sms_gateway::modem::AtModem;
//! use sms_gateway::protocol::TopicScheme;
//! use sms_gateway::transport::mqtt::MqttClient;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::load_from_file("sms-gateway.toml".as_ref())?;
//! let timeout = Duration::from_secs(config.modem.command_timeout_secs);
//! let modem = AtModem::open(&config.modem.device, config.modem.baud_rate, timeout).await?;
//! let transport = MqttClient::new(config.mqtt.clone(), TopicScheme::from_config(&config.mqtt))?;
//!
//! let mut gateway = GatewayLifecycle::new(config, transport, Arc::new(modem));
//! gateway.start().await?;
//! gateway.wait_for_permanent_disconnect().await;
//! gateway.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod modem;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use gateway::GatewayLifecycle;
pub use transport::mqtt::MqttClient;
