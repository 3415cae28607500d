//! Transport layer between the gateway and the MQTT broker
//!
//! This module provides the transport abstraction the gateway is written
//! against and its MQTT implementation.

use tokio::sync::{mpsc, watch};

pub mod mqtt;

pub use mqtt::ConnectionState;

/// Publish received on one of the subscribed topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the broker connection so the
/// gateway can be driven by a mock transport in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker; resolves once the connection is confirmed
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker and stop reconnecting
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Subscribe to a topic; the subscription survives reconnects
    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<ConnectionState>;

    /// Follow connection state changes; `None` before `connect`
    fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;

    /// Set the channel that receives every inbound publish
    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
