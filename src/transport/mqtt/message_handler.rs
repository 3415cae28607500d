//! Pure message routing for MQTT events
//!
//! This module turns raw rumqttc events into routing decisions and forwards
//! inbound publishes to the gateway.

use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::{mqttbytes::QoS, Event};
use rumqttc::Outgoing;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Only publishes on a subscribed topic are forwarded
    pub fn should_forward_message(topic: &str, subscribed_topics: &[String]) -> bool {
        if subscribed_topics.iter().any(|subscribed| subscribed == topic) {
            return true;
        }
        debug!("Ignoring message on unsubscribed topic: {}", topic);
        false
    }

    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Retained state uses QoS 1, transient notifications QoS 0
    pub fn determine_qos_level(retain: bool) -> QoS {
        match retain {
            true => QoS::AtLeastOnce,
            false => QoS::AtMostOnce,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed; `rejected` filters were refused by the broker
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Our own DISCONNECT was written; the session is over
    DisconnectSent,
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Hands inbound publishes to the dispatcher task
///
/// The sender sits behind a std mutex so it can be installed from the
/// synchronous `Transport::set_message_sender`; it is cloned out before
/// awaiting so the lock is never held across a send.
pub struct MessageForwarder {
    message_sender: std::sync::Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self {
            message_sender: std::sync::Mutex::new(None),
        }
    }

    pub fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        let mut slot = self
            .message_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(sender);
    }

    fn sender(&self) -> Option<mpsc::Sender<InboundMessage>> {
        self.message_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Forward an inbound message to the gateway
    pub async fn forward(&self, message: InboundMessage) -> Result<(), String> {
        if let Some(sender) = self.sender() {
            debug!("Forwarding message on {} to dispatcher", message.topic);
            sender
                .send(message)
                .await
                .map_err(|e| format!("Failed to forward message to dispatcher: {e}"))
        } else {
            warn!("Received MQTT message but no message sender configured - message dropped");
            Err("No message sender configured".to_string())
        }
    }
}

impl Default for MessageForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };

    #[test]
    fn test_should_forward_message() {
        let subscribed = vec![
            "sms/send".to_string(),
            "sms/message_text/state".to_string(),
        ];

        assert!(MessageHandler::should_forward_message("sms/send", &subscribed));
        assert!(MessageHandler::should_forward_message(
            "sms/message_text/state",
            &subscribed
        ));
        assert!(!MessageHandler::should_forward_message(
            "sms/signal/state",
            &subscribed
        ));
    }

    #[test]
    fn test_route_mqtt_event() {
        // Arrange
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: Bytes::from("sms/message_text/state"),
            pkid: 1,
            payload: Bytes::from("hello"),
            properties: None,
        }));

        // Act & Assert
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));

        if let EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } = MessageHandler::route_mqtt_event(&publish)
        {
            assert_eq!(topic, "sms/message_text/state");
            assert_eq!(payload, b"hello");
            assert!(retain);
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[test]
    fn test_only_own_disconnect_ends_session() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(3))),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_determine_qos_level() {
        assert_eq!(MessageHandler::determine_qos_level(true), QoS::AtLeastOnce);
        assert_eq!(MessageHandler::determine_qos_level(false), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_message_forwarder() {
        let forwarder = MessageForwarder::new();
        let message = InboundMessage {
            topic: "sms/send".to_string(),
            payload: br#"{"number":"1","text":"x"}"#.to_vec(),
            retain: false,
        };

        // Should fail without sender
        assert!(forwarder.forward(message.clone()).await.is_err());

        let (tx, mut rx) = mpsc::channel(1);
        forwarder.set_message_sender(tx);
        assert!(forwarder.forward(message.clone()).await.is_ok());

        assert_eq!(rx.recv().await, Some(message));
    }
}
