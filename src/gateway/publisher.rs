//! Outbound state publishing
//!
//! Serializes gateway and modem state onto the state topics. Every publish is
//! best effort: nothing is sent while the broker is unreachable, and transport
//! errors are logged instead of propagated.

use super::connectivity::{ConnectivityTracker, DeviceStatus};
use super::counter::SentCounter;
use crate::modem::{NetworkInfo, SignalQuality, SmsCapacity, SmsMessage};
use crate::protocol::discovery::DiscoveryConfig;
use crate::protocol::{
    local_timestamp, CounterState, DeleteStatus, ModemInfo, ReceivedSms, SendStatus, SimInfo,
    TopicScheme,
};
use crate::transport::Transport;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn, Instrument};

pub struct StatePublisher<T: Transport + 'static> {
    transport: Arc<T>,
    topics: TopicScheme,
    connectivity: Arc<ConnectivityTracker>,
    counter: Arc<SentCounter>,
    cost_per_message: f64,
    last_device_status: Mutex<Option<DeviceStatus>>,
}

impl<T: Transport + 'static> StatePublisher<T> {
    pub fn new(
        transport: Arc<T>,
        topics: TopicScheme,
        connectivity: Arc<ConnectivityTracker>,
        counter: Arc<SentCounter>,
        cost_per_message: f64,
    ) -> Self {
        Self {
            transport,
            topics,
            connectivity,
            counter,
            cost_per_message,
            last_device_status: Mutex::new(None),
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Publish raw bytes; returns whether the broker accepted the message
    pub async fn publish_raw(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        if !self.transport.is_connected() {
            debug!(topic = %topic, "MQTT not connected, skipping publish");
            return false;
        }
        let publish = self.transport.publish(topic, payload, retain);
        match publish
            .instrument(crate::mqtt_span!(topic = %topic, retain = retain))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to publish");
                false
            }
        }
    }

    pub async fn publish_json<S: Serialize>(&self, topic: &str, payload: &S, retain: bool) -> bool {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.publish_raw(topic, bytes, retain).await,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to serialize payload");
                false
            }
        }
    }

    /// Publish the connectivity snapshot, logging ONLINE/OFFLINE transitions
    pub async fn publish_device_status(&self) {
        let snapshot = self.connectivity.snapshot();
        if !self
            .publish_json(&self.topics.device_status(), &snapshot, true)
            .await
        {
            return;
        }

        let previous = self
            .last_device_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(snapshot.status);
        if previous.is_some_and(|previous| previous != snapshot.status) {
            match snapshot.status {
                DeviceStatus::Online => info!(
                    consecutive_failures = snapshot.consecutive_failures,
                    "Modem: ONLINE"
                ),
                DeviceStatus::Offline => warn!(
                    seconds_since_last_success = snapshot.seconds_since_last_success.unwrap_or(0),
                    "Modem: OFFLINE"
                ),
            }
        }
    }

    pub async fn publish_counter(&self) {
        let state = CounterState::new(self.counter.get(), self.cost_per_message);
        self.publish_json(&self.topics.sms_counter(), &state, true)
            .await;
    }

    pub async fn publish_signal(&self, signal: &SignalQuality) {
        self.publish_json(&self.topics.signal_state(), signal, true)
            .await;
    }

    pub async fn publish_network(&self, network: &NetworkInfo) {
        self.publish_json(&self.topics.network_state(), network, true)
            .await;
    }

    pub async fn publish_sms_received(&self, message: &SmsMessage) {
        let payload = ReceivedSms {
            message,
            timestamp: local_timestamp(),
        };
        if self
            .publish_json(&self.topics.sms_state(), &payload, false)
            .await
        {
            info!(number = %message.number, "Published SMS");
        }
    }

    pub async fn publish_send_status(&self, status: &SendStatus) {
        self.publish_json(&self.topics.send_status(), status, false)
            .await;
    }

    pub async fn publish_delete_status(&self, status: &DeleteStatus) {
        self.publish_json(&self.topics.delete_sms_status(), status, false)
            .await;
    }

    pub async fn publish_modem_info(&self, modem_info: &ModemInfo) {
        self.publish_json(&self.topics.modem_info(), modem_info, true)
            .await;
    }

    pub async fn publish_sim_info(&self, sim_info: &SimInfo) {
        self.publish_json(&self.topics.sim_info(), sim_info, true)
            .await;
    }

    pub async fn publish_capacity(&self, capacity: &SmsCapacity) {
        self.publish_json(&self.topics.sms_capacity(), capacity, true)
            .await;
    }

    /// Echo of the phone number text field
    pub async fn publish_phone_number(&self, value: &str) {
        self.publish_raw(
            &self.topics.phone_number_state(),
            value.as_bytes().to_vec(),
            false,
        )
        .await;
    }

    /// Message text field; `retain` is only used to clear it
    pub async fn publish_message_text(&self, value: &str, retain: bool) -> bool {
        self.publish_raw(
            &self.topics.message_text_state(),
            value.as_bytes().to_vec(),
            retain,
        )
        .await
    }

    pub async fn publish_discovery(&self, configs: &[DiscoveryConfig]) {
        let mut published = 0;
        for config in configs {
            if self.publish_json(&config.topic, &config.payload, true).await {
                published += 1;
            }
        }
        info!(
            published = published,
            total = configs.len(),
            "Published Home Assistant discovery configs"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::Value;
    use tempfile::TempDir;

    fn publisher(transport: Arc<MockTransport>, dir: &TempDir) -> StatePublisher<MockTransport> {
        StatePublisher::new(
            transport,
            TopicScheme::new("sms", "homeassistant"),
            Arc::new(ConnectivityTracker::default()),
            Arc::new(SentCounter::load(dir.path().join("counter.json"))),
            0.5,
        )
    }

    #[tokio::test]
    async fn test_skips_when_disconnected() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.set_connected(false);
        let publisher = publisher(transport.clone(), &dir);

        publisher.publish_counter().await;

        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_counter_payload_includes_cost() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let publisher = publisher(transport.clone(), &dir);
        publisher.counter.increment();
        publisher.counter.increment();
        publisher.counter.increment();

        publisher.publish_counter().await;

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "sms/sms_counter/state");
        assert!(published[0].retain);
        let payload: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(payload["count"], 3);
        assert_eq!(payload["cost"], 1.5);
    }

    #[tokio::test]
    async fn test_device_status_is_retained_snapshot() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let publisher = publisher(transport.clone(), &dir);

        publisher.publish_device_status().await;
        publisher.connectivity.record_success();
        publisher.publish_device_status().await;

        let statuses = transport.payloads_on("sms/device_status/state").await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0]["status"], "offline");
        assert_eq!(statuses[1]["status"], "online");
        assert_eq!(statuses[1]["successful_operations"], 1);
    }

    #[tokio::test]
    async fn test_message_text_clear_is_retained_empty() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let publisher = publisher(transport.clone(), &dir);

        assert!(publisher.publish_message_text("", true).await);

        let published = transport.get_published_messages().await;
        assert_eq!(published[0].topic, "sms/message_text/state");
        assert!(published[0].payload.is_empty());
        assert!(published[0].retain);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::with_failure());
        let publisher = publisher(transport.clone(), &dir);

        assert!(!publisher.publish_message_text("x", false).await);
    }
}
