//! I/O side of the MQTT client
//!
//! This module owns the rumqttc event loop, runs the reconnection supervisor
//! and implements [`Transport`] on top of it.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use super::reconnect::{ConnectionEvent, ReconnectDecision, ReconnectPolicy};
use crate::config::MqttSection;
use crate::protocol::TopicScheme;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, ConnectionError, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedTopics = Arc<std::sync::Mutex<Vec<String>>>;

/// How long shutdown waits for queued publishes and the DISCONNECT to be written
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT transport client for the SMS gateway
pub struct MqttClient {
    config: MqttSection,
    topics: TopicScheme,
    client: Arc<Mutex<AsyncClient>>,
    /// Held until `connect` hands it to the supervisor
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    event_loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_policy: ReconnectPolicy,
    subscribed_topics: SharedTopics,
    message_forwarder: Arc<MessageForwarder>,
}

impl MqttClient {
    pub fn new(config: MqttSection, topics: TopicScheme) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(&config, &topics)?;

        Ok(MqttClient {
            config,
            topics,
            client: Arc::new(Mutex::new(client)),
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            event_loop_handle: std::sync::Mutex::new(None),
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_policy: ReconnectPolicy::default(),
            subscribed_topics: Arc::new(std::sync::Mutex::new(Vec::new())),
            message_forwarder: Arc::new(MessageForwarder::new()),
        })
    }

    /// Replace the default reconnect policy; takes effect on `connect`
    pub fn with_reconnect_policy(mut self, reconnect_policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = reconnect_policy;
        self
    }

    /// Fresh client and event loop, used for the first connection and every reconnect
    fn create_connection(
        config: &MqttSection,
        topics: &TopicScheme,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(config, topics)?;
        Ok(AsyncClient::new(mqtt_options, 10))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for the first ConnAck, failing on disconnect or timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Start the event loop supervisor and wait for the broker's ConnAck
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            config: self.config.clone(),
            topics: self.topics.clone(),
            shared_client: self.client.clone(),
            event_loop,
            state_tx,
            shutdown_rx,
            reconnect_policy: self.reconnect_policy.clone(),
            reconnect_attempts: 0,
            subscribed_topics: self.subscribed_topics.clone(),
            message_forwarder: self.message_forwarder.clone(),
        };
        let handle = tokio::spawn(supervisor.run());
        *self
            .event_loop_handle
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        Self::wait_for_connection_confirmation(state_rx, self.reconnect_policy.connect_timeout)
            .await
    }

    /// Queue a DISCONNECT behind pending publishes, then stop the supervisor
    ///
    /// The supervisor keeps polling until the DISCONNECT is written or
    /// [`DISCONNECT_GRACE`] passes, so a final retained publish still reaches
    /// the broker. A connection that is already gone is not an error here.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let handle = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut handle) = handle else {
            debug!("MQTT client was never connected, nothing to disconnect");
            return Ok(());
        };

        {
            let client = self.client.lock().await;
            match tokio::time::timeout(DISCONNECT_GRACE, client.disconnect()).await {
                Ok(Ok(())) => debug!("Queued DISCONNECT"),
                Ok(Err(e)) => warn!(error = %e, "MQTT connection already closed"),
                Err(_) => warn!("MQTT request queue full, skipping DISCONNECT"),
            }
        }

        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
            info!("Sent shutdown signal to reconnection supervisor");
        }

        if !handle.is_finished() {
            let grace = DISCONNECT_GRACE + Duration::from_secs(1);
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e)
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
                _ => {}
            }
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// Current connection state, `None` before `connect`
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected: state_rx is None".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !current_state.is_connected() {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    /// Subscribe with QoS 1 and remember the topic for re-subscription
    pub async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;

        {
            let client = self.client.lock().await;
            client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| {
                    MqttError::SubscriptionFailed(
                        format!("Failed to subscribe to {topic}: {e}").into(),
                    )
                })?;
        }

        let mut subscribed = self
            .subscribed_topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !subscribed.iter().any(|existing| existing == topic) {
            subscribed.push(topic.to_string());
        }

        debug!("Subscribed to: {}", topic);
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let qos = MessageHandler::determine_qos_level(retain);
        let client = self.client.lock().await;
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic = %topic, retain = retain, "Published message");
        Ok(())
    }
}

/// Owns the event loop; replaces it with a fresh connection after every failure
struct Supervisor {
    config: MqttSection,
    topics: TopicScheme,
    shared_client: Arc<Mutex<AsyncClient>>,
    event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_policy: ReconnectPolicy,
    reconnect_attempts: u32,
    subscribed_topics: SharedTopics,
    message_forwarder: Arc<MessageForwarder>,
}

impl Supervisor {
    async fn run(mut self) {
        info!(
            "Starting MQTT event loop with reconnection supervisor for {}",
            self.config.broker_url
        );

        loop {
            let polled = tokio::select! {
                changed = self.shutdown_rx.changed() => Err(changed.is_err()),
                result = self.event_loop.poll() => Ok(result),
            };

            let keep_running = match polled {
                Err(true) => false,
                Err(false) => {
                    let shutdown_requested = *self.shutdown_rx.borrow();
                    if shutdown_requested {
                        self.flush_until_disconnect_sent().await;
                    }
                    !shutdown_requested
                }
                Ok(Ok(event)) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    self.process_event_route(route).await
                }
                Ok(Err(e)) => self.handle_event_loop_error(e).await,
            };

            if !keep_running {
                break;
            }
        }
        info!("MQTT event loop stopped");
    }

    /// Keep writing queued requests until the DISCONNECT leaves or the grace period ends
    async fn flush_until_disconnect_sent(&mut self) {
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(event) => {
                        if let EventRoute::DisconnectSent = MessageHandler::route_mqtt_event(&event)
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Event loop closed while flushing");
                        return;
                    }
                }
            }
        })
        .await;

        match flushed {
            Ok(()) => info!("Outgoing MQTT queue flushed"),
            Err(_) => warn!("Timed out flushing outgoing MQTT queue"),
        }
    }

    /// Returns false when the supervisor should stop
    async fn handle_event_loop_error(&mut self, error: ConnectionError) -> bool {
        let _ = self
            .state_tx
            .send(ConnectionEvent::NetworkError(error.to_string()).into_state());

        self.reconnect().await
    }

    /// Returns false when the supervisor should stop
    async fn process_event_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.reconnect_attempts = 0;
                self.resubscribe_to_topics().await;
                let _ = self.state_tx.send(ConnectionEvent::ConnAck.into_state());
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                self.handle_message_received(InboundMessage {
                    topic,
                    payload,
                    retain,
                })
                .await;
                true
            }
            EventRoute::Disconnected => {
                let _ = self
                    .state_tx
                    .send(ConnectionEvent::BrokerDisconnect.into_state());
                self.reconnect().await
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            } => {
                if rejected > 0 {
                    error!(
                        packet_id = packet_id,
                        rejected = rejected,
                        "Broker rejected subscription"
                    );
                } else {
                    debug!(target: "mqtt_transport", "Subscription {} confirmed", packet_id);
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::DisconnectSent => {
                info!("DISCONNECT sent to broker");
                false
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn handle_message_received(&mut self, message: InboundMessage) {
        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", message.topic);

        let subscribed = self
            .subscribed_topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if !MessageHandler::should_forward_message(&message.topic, &subscribed) {
            return;
        }

        if let Err(e) = self.message_forwarder.forward(message).await {
            error!("Failed to forward message: {}", e);
        }
    }

    /// Replay every subscription on each ConnAck; sessions start clean
    async fn resubscribe_to_topics(&mut self) {
        let topics = self
            .subscribed_topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let client = self.shared_client.lock().await;
        for topic in topics {
            // try_ keeps a full request queue from stalling the loop that drains it
            if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
            }
        }
    }

    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Swap in a fresh client and event loop; a failure here is retried on the next poll error
    async fn apply_new_connection(&mut self) {
        match MqttClient::create_connection(&self.config, &self.topics) {
            Ok((new_client, new_event_loop)) => {
                self.event_loop = new_event_loop;
                *self.shared_client.lock().await = new_client;
                info!("Created new connection for reconnection attempt");
            }
            Err(e) => error!("Failed to create new connection: {}", e),
        }
    }

    /// Returns false when reconnecting is abandoned
    async fn reconnect(&mut self) -> bool {
        let decision = self
            .reconnect_policy
            .decide(self.reconnect_attempts, *self.shutdown_rx.borrow());

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                self.reconnect_attempts = attempt;
                let _ = self
                    .state_tx
                    .send(ConnectionEvent::RetryScheduled(attempt).into_state());
                info!(
                    attempt = attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Reconnecting to MQTT broker"
                );

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay).await {
                    return false;
                }

                self.apply_new_connection().await;
                true
            }
            ReconnectDecision::Stop => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectDecision::GiveUp => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                let _ = self.state_tx.send(ConnectionEvent::GaveUp(reason).into_state());
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, retain).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.state_rx.clone()
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.message_forwarder.set_message_sender(sender);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // No async work in Drop; callers wanting a clean DISCONNECT use disconnect()
        let handle = self
            .event_loop_handle
            .get_mut()
            .ok()
            .and_then(|slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn test_client() -> MqttClient {
        let config = crate::config::GatewayConfig::test_config();
        let topics = TopicScheme::from_config(&config.mqtt);
        MqttClient::new(config.mqtt, topics).unwrap()
    }

    #[test]
    fn test_setup_connection_channels() {
        // Act
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        // Assert
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        // Arrange
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        // Act
        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;

        // Assert
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        // Arrange: keep the sender alive so the channel stays open
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();

        // Act
        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;

        // Assert
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("ConnAck"),
            "Error should mention ConnAck, got: {err_msg}"
        );
        drop(state_tx);
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        // Arrange
        let ((state_tx, state_rx), (_, _)) = MqttClient::setup_connection_channels();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("Test disconnect".to_string()));
        });

        // Act
        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;

        // Assert
        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let ((_, _), (_shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();

        let result = Supervisor::interruptible_sleep(shutdown_rx, Duration::from_millis(10)).await;

        assert!(result, "Sleep should complete without interruption");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        // Arrange
        let ((_, _), (shutdown_tx, shutdown_rx)) = MqttClient::setup_connection_channels();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        // Act
        let result = Supervisor::interruptible_sleep(shutdown_rx, Duration::from_secs(1)).await;

        // Assert
        assert!(!result, "Sleep should be interrupted by shutdown signal");
    }

    #[tokio::test]
    async fn test_connection_state_before_connect() {
        let client = test_client();

        assert!(client.connection_state().is_none());
        assert!(client.watch_state().is_none());
        assert!(!client.is_permanently_disconnected());
        assert!(!Transport::is_connected(&client));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe_fail_without_connection() {
        let mut client = test_client();

        assert!(client
            .publish("homeassistant/sensor/sms_gateway/signal/state", b"{}".to_vec(), true)
            .await
            .is_err());
        assert!(client
            .subscribe("homeassistant/sensor/sms_gateway/send")
            .await
            .is_err());
        assert!(client
            .subscribed_topics
            .lock()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_message_sender_installed_synchronously() {
        let client = test_client();
        let (tx, mut rx) = mpsc::channel(1);

        client.set_message_sender(tx);
        client
            .message_forwarder
            .forward(InboundMessage {
                topic: "t".to_string(),
                payload: vec![],
                retain: false,
            })
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
    }

    fn supervisor(client: &MqttClient) -> (Supervisor, watch::Receiver<ConnectionState>) {
        let (_, event_loop) = MqttClient::create_connection(&client.config, &client.topics).unwrap();
        let ((state_tx, state_rx), (_, shutdown_rx)) = MqttClient::setup_connection_channels();
        let supervisor = Supervisor {
            config: client.config.clone(),
            topics: client.topics.clone(),
            shared_client: client.client.clone(),
            event_loop,
            state_tx,
            shutdown_rx,
            reconnect_policy: ReconnectPolicy::default(),
            reconnect_attempts: 0,
            subscribed_topics: client.subscribed_topics.clone(),
            message_forwarder: client.message_forwarder.clone(),
        };
        (supervisor, state_rx)
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_client_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MqttClient>();
    }

    #[tokio::test]
    async fn test_supervisor_future_is_send() {
        let client = test_client();
        let (supervisor, _state_rx) = supervisor(&client);

        let run = supervisor.run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_own_disconnect_ends_supervisor_without_reconnect() {
        let client = test_client();
        let (mut supervisor, state_rx) = supervisor(&client);

        let keep_running = supervisor
            .process_event_route(EventRoute::DisconnectSent)
            .await;

        assert!(!keep_running);
        assert_eq!(supervisor.reconnect_attempts, 0);
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_disconnect_after_event_loop_gone_is_ok() {
        let mut client = test_client();
        let ((state_tx, state_rx), (shutdown_tx, _)) = MqttClient::setup_connection_channels();
        client.state_rx = Some(state_rx);
        client.state_tx = Some(state_tx);
        client.shutdown_tx = Some(shutdown_tx);
        // a supervisor that already stopped and dropped the event loop
        drop(client.event_loop.get_mut().unwrap().take());
        *client.event_loop_handle.get_mut().unwrap() = Some(tokio::spawn(async {}));

        let result = client.disconnect().await;

        assert!(result.is_ok(), "closed connection must not fail shutdown");
        assert_eq!(
            client.connection_state(),
            Some(ConnectionState::Disconnected("Client disconnected".to_string()))
        );
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let client = test_client();

        let result = client.disconnect().await;

        assert!(
            result.is_ok(),
            "Disconnect should not fail even if not connected"
        );
    }
}
