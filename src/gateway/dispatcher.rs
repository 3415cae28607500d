//! Inbound command handling
//!
//! One dispatcher task consumes every inbound publish and maps it, by topic,
//! to a modem action or a text field update. Handlers never fail: problems
//! end up in a status payload or the log.

use super::counter::SentCounter;
use super::publisher::StatePublisher;
use super::tracker::OperationTracker;
use crate::modem::{needs_unicode, FailureKind, Modem, ModemError, OutgoingSms, Smsc};
use crate::protocol::{
    local_timestamp, CommandTopic, DeleteStatus, SendCommand, SendStatus, BUTTON_PRESS,
};
use crate::transport::{InboundMessage, Transport};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Text fields behind the send button
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCommand {
    pub phone_number: String,
    pub message_text: String,
}

/// Message shown to the user for a failed send
pub fn user_facing_send_error(error: &ModemError) -> String {
    match error.failure_kind() {
        FailureKind::SendFailed => {
            "SMS sending failed - check SIM card, network signal or device connection".to_string()
        }
        FailureKind::NetworkRegistration => {
            "Network registration failed - check SIM card and signal".to_string()
        }
        FailureKind::SmscUnknown => {
            "SMSC number not found - configure SMS center number in SIM settings".to_string()
        }
        FailureKind::Other => format!("SMS sending error: {error}"),
    }
}

pub struct CommandDispatcher<T: Transport + 'static> {
    modem: Arc<dyn Modem>,
    operations: Arc<OperationTracker<T>>,
    publisher: Arc<StatePublisher<T>>,
    counter: Arc<SentCounter>,
    smsc: Smsc,
    pending: Mutex<PendingCommand>,
    next_reference: AtomicU8,
}

impl<T: Transport + 'static> CommandDispatcher<T> {
    pub fn new(
        modem: Arc<dyn Modem>,
        operations: Arc<OperationTracker<T>>,
        publisher: Arc<StatePublisher<T>>,
        counter: Arc<SentCounter>,
        smsc: Smsc,
    ) -> Self {
        Self {
            modem,
            operations,
            publisher,
            counter,
            smsc,
            pending: Mutex::new(PendingCommand::default()),
            next_reference: AtomicU8::new(0),
        }
    }

    pub fn pending(&self) -> PendingCommand {
        self.lock_pending().clone()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingCommand> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consume inbound messages until the channel closes
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<InboundMessage>) {
        info!("Command dispatcher started");
        while let Some(message) = receiver.recv().await {
            self.handle(message).await;
        }
        info!("Command dispatcher stopped");
    }

    pub async fn handle(&self, message: InboundMessage) {
        let Some(command) = self.publisher.topics().classify(&message.topic) else {
            debug!(topic = %message.topic, "Ignoring message on unknown topic");
            return;
        };
        if message.retain && command.triggers_action() {
            info!(topic = %message.topic, "Ignoring retained command");
            return;
        }

        let payload = String::from_utf8_lossy(&message.payload).into_owned();
        info!(topic = %message.topic, payload = %payload, "Received MQTT message");

        match command {
            CommandTopic::Send => self.handle_send_command(&payload).await,
            CommandTopic::SendButton if payload == BUTTON_PRESS => self.handle_send_button().await,
            CommandTopic::ResetCounterButton if payload == BUTTON_PRESS => {
                self.handle_reset_counter().await
            }
            CommandTopic::DeleteAllSmsButton if payload == BUTTON_PRESS => {
                self.handle_delete_all().await
            }
            CommandTopic::SendButton
            | CommandTopic::ResetCounterButton
            | CommandTopic::DeleteAllSmsButton => {
                debug!(topic = %message.topic, "Ignoring button payload other than PRESS")
            }
            CommandTopic::PhoneNumberSet => {
                self.lock_pending().phone_number = payload.clone();
                self.publisher.publish_phone_number(&payload).await;
                info!("Phone number updated via command: {}", payload);
            }
            CommandTopic::MessageTextSet => {
                self.lock_pending().message_text = payload.clone();
                self.publisher.publish_message_text(&payload, false).await;
                info!("Message text updated via command: {}", payload);
            }
            CommandTopic::PhoneNumberState => {
                info!("Phone number synced from state: {}", payload);
                self.lock_pending().phone_number = payload;
            }
            CommandTopic::MessageTextState => {
                info!("Message text synced from state: {}", payload);
                self.lock_pending().message_text = payload;
            }
        }
    }

    async fn handle_send_command(&self, payload: &str) {
        match SendCommand::parse(payload.as_bytes()) {
            Ok(command) => {
                info!(
                    number = %command.number,
                    unicode = ?command.unicode,
                    "Processing SMS send command"
                );
                self.send_sms(&command.number, &command.text, command.unicode)
                    .await;
            }
            Err(e) => error!("{}", e),
        }
    }

    /// Send one SMS (all of its parts) and publish the outcome
    pub async fn send_sms(&self, number: &str, text: &str, unicode: Option<bool>) -> SendStatus {
        let status = match self.deliver(number, text, unicode).await {
            Ok(parts) => {
                let count = self.counter.increment_in_background().await;
                self.publisher.publish_counter().await;
                info!(number = %number, parts = parts, count = count, "SMS sent successfully");
                SendStatus::Success {
                    number: number.to_string(),
                    text: text.to_string(),
                    timestamp: local_timestamp(),
                }
            }
            Err(e) => {
                error!(number = %number, error = %e, "Failed to send SMS");
                SendStatus::Error {
                    error: user_facing_send_error(&e),
                    number: number.to_string(),
                    text: text.to_string(),
                    timestamp: local_timestamp(),
                }
            }
        };
        self.publisher.publish_send_status(&status).await;
        status
    }

    async fn deliver(
        &self,
        number: &str,
        text: &str,
        unicode: Option<bool>,
    ) -> Result<usize, ModemError> {
        let unicode = unicode.unwrap_or_else(|| {
            let detected = needs_unicode(text);
            if detected {
                info!("Auto-detected non-ASCII characters, using Unicode mode");
            }
            detected
        });
        let reference = self.next_reference.fetch_add(1, Ordering::Relaxed);
        let parts = OutgoingSms::new(number, text, unicode).encode(&self.smsc, reference)?;

        match &self.smsc {
            Smsc::Number(smsc) => debug!("Using configured SMSC: {}", smsc),
            Smsc::Location(location) => debug!("Using SMSC from SIM location {}", location),
        }

        for part in &parts {
            let message_reference = self
                .operations
                .track("SendSMS", self.modem.send_sms(part))
                .await?;
            debug!(message_reference = message_reference, "SMS part accepted");
        }
        Ok(parts.len())
    }

    async fn handle_send_button(&self) {
        let pending = self.pending();
        info!(
            "Button pressed - current state: phone='{}', message='{}'",
            pending.phone_number, pending.message_text
        );

        if pending.phone_number.trim().is_empty() || pending.message_text.trim().is_empty() {
            let status = SendStatus::MissingFields {
                message: format!(
                    "Please fill in phone number and message text first. Current: phone='{}', message='{}'",
                    pending.phone_number, pending.message_text
                ),
                timestamp: local_timestamp(),
            };
            self.publisher.publish_send_status(&status).await;
            warn!("Button pressed but fields empty");
            return;
        }

        self.send_sms(&pending.phone_number, &pending.message_text, None)
            .await;
        self.clear_message_field().await;
    }

    /// Clear the message text, keeping the phone number
    pub async fn clear_message_field(&self) {
        self.lock_pending().message_text.clear();
        if self.publisher.publish_message_text("", true).await {
            info!("Cleared message text field (keeping phone number)");
        } else {
            info!("Cleared message text field (internal state only)");
        }
    }

    async fn handle_reset_counter(&self) {
        info!("Reset counter button pressed");
        self.counter.reset_in_background().await;
        self.publisher.publish_counter().await;
    }

    async fn handle_delete_all(&self) {
        info!("Delete all SMS button pressed");
        let status = match self.delete_all().await {
            Ok(deleted_count) => {
                info!(deleted_count = deleted_count, "Deleted SMS messages from SIM");
                DeleteStatus::Success {
                    deleted_count,
                    timestamp: local_timestamp(),
                }
            }
            Err(e) => {
                error!(error = %e, "Error deleting all SMS");
                DeleteStatus::Error {
                    error: e.to_string(),
                    timestamp: local_timestamp(),
                }
            }
        };
        self.publisher.publish_delete_status(&status).await;
    }

    async fn delete_all(&self) -> Result<usize, ModemError> {
        let messages = self
            .operations
            .track("retrieveAllSms", self.modem.retrieve_all_sms())
            .await?;
        for message in &messages {
            self.operations
                .track("deleteSms", self.modem.delete_sms(message))
                .await?;
        }

        match self
            .operations
            .track("GetSMSStatus", self.modem.sms_status())
            .await
        {
            Ok(capacity) => self.publisher.publish_capacity(&capacity).await,
            Err(e) => warn!(error = %e, "Could not update SMS capacity"),
        }
        Ok(messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_send_errors() {
        assert_eq!(
            user_facing_send_error(&ModemError::Rejected),
            "SMS sending failed - check SIM card, network signal or device connection"
        );
        assert_eq!(
            user_facing_send_error(&ModemError::Message(331)),
            "Network registration failed - check SIM card and signal"
        );
        assert_eq!(
            user_facing_send_error(&ModemError::Message(330)),
            "SMSC number not found - configure SMS center number in SIM settings"
        );
        assert_eq!(
            user_facing_send_error(&ModemError::Equipment(10)),
            "SMS sending error: +CME ERROR: 10"
        );
    }
}
