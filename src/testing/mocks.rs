//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] and a mock [`Modem`] so the gateway can be
//! driven end to end without a broker or a serial device.

use crate::error::GatewayError;
use crate::modem::{
    Modem, ModemError, NetworkInfo, SignalQuality, SmsCapacity, SmsMessage, SmsState, SmsSubmit,
};
use crate::transport::{ConnectionState, InboundMessage, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// One publish recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Mock transport for testing
///
/// Starts out connected. `set_connected` and `set_state` drive the state
/// channel the lifecycle follows.
#[derive(Debug)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<std::sync::Mutex<Vec<String>>>,
    pub should_fail: bool,
    pub fail_connect: bool,
    connected: AtomicBool,
    disconnected: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    message_sender: std::sync::Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(std::sync::Mutex::new(Vec::new())),
            should_fail: false,
            fail_connect: false,
            connected: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            state_tx,
            message_sender: std::sync::Mutex::new(None),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connected, but every publish fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// `connect` fails
    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.set_state(ConnectionState::Connected);
        } else {
            self.set_state(ConnectionState::Disconnected("mock disconnect".to_string()));
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.connected
            .store(state == ConnectionState::Connected, Ordering::SeqCst);
        self.state_tx.send_replace(state);
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Raw payloads published on `topic`, as text
    pub async fn raw_on(&self, topic: &str) -> Vec<String> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    /// JSON payloads published on `topic`
    pub async fn payloads_on(&self, topic: &str) -> Vec<Value> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Deliver a message as if the broker had sent it; false without a sender
    pub async fn inject(&self, topic: &str, payload: &str, retain: bool) -> bool {
        let sender = self
            .message_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match sender {
            Some(sender) => sender
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.as_bytes().to_vec(),
                    retain,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = GatewayError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.fail_connect {
            return Err(GatewayError::internal_error("Mock connection failure"));
        }
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected("Client disconnect".to_string()));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(GatewayError::internal_error("Mock publish failure"));
        }
        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(self.state_tx.borrow().clone())
    }

    fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        Some(self.state_tx.subscribe())
    }

    fn is_permanently_disconnected(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *self
            .message_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sender);
    }
}

/// Stored message at a single SIM location
pub fn stored_sms(location: u32, number: &str, text: &str, state: SmsState) -> SmsMessage {
    SmsMessage {
        locations: vec![location],
        number: number.to_string(),
        text: text.to_string(),
        state,
        date_time: None,
    }
}

/// Mock modem for testing
///
/// Keeps an in-memory SIM. Failures are injected per operation name
/// (`"send_sms"`, `"retrieve_all_sms"`, ...) and every call is recorded.
#[derive(Debug)]
pub struct MockModem {
    messages: std::sync::Mutex<Vec<SmsMessage>>,
    failures: std::sync::Mutex<HashMap<String, ModemError>>,
    calls: std::sync::Mutex<Vec<String>>,
    sent: std::sync::Mutex<Vec<SmsSubmit>>,
    deleted: std::sync::Mutex<Vec<u32>>,
    next_reference: AtomicU8,
    pub sim_size: u32,
    pub signal: SignalQuality,
    pub network: NetworkInfo,
}

impl Default for MockModem {
    fn default() -> Self {
        Self {
            messages: std::sync::Mutex::new(Vec::new()),
            failures: std::sync::Mutex::new(HashMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
            sent: std::sync::Mutex::new(Vec::new()),
            deleted: std::sync::Mutex::new(Vec::new()),
            next_reference: AtomicU8::new(1),
            sim_size: 30,
            signal: SignalQuality::from_csq(20, 0),
            network: NetworkInfo {
                network_name: "Mock Mobile".to_string(),
                network_code: "230 01".to_string(),
                state: "HomeNetwork".to_string(),
                lac: None,
                cid: None,
            },
        }
    }
}

fn locked<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockModem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<SmsMessage>) -> Self {
        let modem = Self::default();
        modem.set_messages(messages);
        modem
    }

    pub fn set_messages(&self, messages: Vec<SmsMessage>) {
        *locked(&self.messages) = messages;
    }

    pub fn push_message(&self, message: SmsMessage) {
        locked(&self.messages).push(message);
    }

    pub fn messages(&self) -> Vec<SmsMessage> {
        locked(&self.messages).clone()
    }

    /// Make `operation` fail with `error` until cleared
    pub fn fail(&self, operation: &str, error: ModemError) {
        locked(&self.failures).insert(operation.to_string(), error);
    }

    pub fn clear_failures(&self) {
        locked(&self.failures).clear();
    }

    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    pub fn sent_parts(&self) -> Vec<SmsSubmit> {
        locked(&self.sent).clone()
    }

    pub fn deleted_locations(&self) -> Vec<u32> {
        locked(&self.deleted).clone()
    }

    fn call(&self, operation: &str) -> Result<(), ModemError> {
        locked(&self.calls).push(operation.to_string());
        match locked(&self.failures).get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Modem for MockModem {
    async fn send_sms(&self, part: &SmsSubmit) -> Result<u8, ModemError> {
        self.call("send_sms")?;
        locked(&self.sent).push(part.clone());
        Ok(self.next_reference.fetch_add(1, Ordering::Relaxed))
    }

    async fn signal_quality(&self) -> Result<SignalQuality, ModemError> {
        self.call("signal_quality")?;
        Ok(self.signal.clone())
    }

    async fn network_info(&self) -> Result<NetworkInfo, ModemError> {
        self.call("network_info")?;
        Ok(self.network.clone())
    }

    async fn imei(&self) -> Result<String, ModemError> {
        self.call("imei")?;
        Ok("356938035643809".to_string())
    }

    async fn manufacturer(&self) -> Result<String, ModemError> {
        self.call("manufacturer")?;
        Ok("Mock".to_string())
    }

    async fn model(&self) -> Result<String, ModemError> {
        self.call("model")?;
        Ok("MockModem 3000".to_string())
    }

    async fn firmware(&self) -> Result<String, ModemError> {
        self.call("firmware")?;
        Ok("1.0.0".to_string())
    }

    async fn sim_imsi(&self) -> Result<String, ModemError> {
        self.call("sim_imsi")?;
        Ok("230011234567890".to_string())
    }

    async fn sms_status(&self) -> Result<SmsCapacity, ModemError> {
        self.call("sms_status")?;
        let used: usize = locked(&self.messages).iter().map(|m| m.locations.len()).sum();
        Ok(SmsCapacity {
            sim_used: used as u32,
            sim_size: self.sim_size,
        })
    }

    async fn retrieve_all_sms(&self) -> Result<Vec<SmsMessage>, ModemError> {
        self.call("retrieve_all_sms")?;
        Ok(self.messages())
    }

    async fn delete_sms(&self, message: &SmsMessage) -> Result<(), ModemError> {
        self.call("delete_sms")?;
        locked(&self.deleted).extend(message.locations.iter().copied());
        locked(&self.messages).retain(|stored| stored.locations != message.locations);
        Ok(())
    }
}
