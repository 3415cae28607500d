//! MQTT v5 client for the SMS gateway
//!
//! The client is split so that decisions stay pure and testable while the
//! I/O lives in one place:
//!
//! - [`connection`] - connection state and broker options
//! - [`message_handler`] - event routing and inbound message forwarding
//! - [`reconnect`] - backoff policy and state transitions
//! - [`client`] - the event loop supervisor and the `Transport` implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use sms_gateway::config::GatewayConfig;
//! use sms_gateway::protocol::TopicScheme;
//! use sms_gateway::transport::mqtt::MqttClient;
//! use sms_gateway::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = GatewayConfig::load_from_file("sms-gateway.toml".as_ref())?;
//! let topics = TopicScheme::from_config(&config.mqtt);
//!
//! let mut client = MqttClient::new(config.mqtt.clone(), topics.clone())?;
//! client.connect().await?;
//! client.subscribe(&topics.command(sms_gateway::protocol::CommandTopic::Send)).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod reconnect;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
pub use reconnect::{ConnectionEvent, ReconnectDecision, ReconnectPolicy};
