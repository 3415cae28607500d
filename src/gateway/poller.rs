//! Incoming SMS polling
//!
//! The modem is asked for its full message list on every cycle. Only the
//! count seen on the previous cycle is remembered; entries past that count
//! are treated as new.

use super::publisher::StatePublisher;
use super::tracker::OperationTracker;
use crate::modem::{Modem, ModemError, SmsState};
use crate::transport::Transport;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct PollState {
    first_run: bool,
    baseline: usize,
}

/// Polls one connection session; build a new poller per session
pub struct SmsPoller<T: Transport + 'static> {
    modem: Arc<dyn Modem>,
    operations: Arc<OperationTracker<T>>,
    publisher: Arc<StatePublisher<T>>,
    auto_delete: bool,
    interval: Duration,
    state: Mutex<PollState>,
}

impl<T: Transport + 'static> SmsPoller<T> {
    pub fn new(
        modem: Arc<dyn Modem>,
        operations: Arc<OperationTracker<T>>,
        publisher: Arc<StatePublisher<T>>,
        auto_delete: bool,
        interval: Duration,
    ) -> Self {
        Self {
            modem,
            operations,
            publisher,
            auto_delete,
            interval,
            state: Mutex::new(PollState {
                first_run: true,
                baseline: 0,
            }),
        }
    }

    /// Message count remembered from the previous cycle
    pub fn baseline(&self) -> usize {
        self.lock_state().baseline
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PollState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One polling cycle; returns the number of messages published
    pub async fn poll_once(&self) -> Result<usize, ModemError> {
        let messages = self
            .operations
            .track("retrieveAllSms", self.modem.retrieve_all_sms())
            .await?;
        let total = messages.len();
        let PollState {
            first_run,
            baseline,
        } = *self.lock_state();

        let mut published = 0;
        if first_run {
            for message in messages.iter().filter(|m| m.state == SmsState::UnRead) {
                self.publisher.publish_sms_received(message).await;
                published += 1;
            }
            info!(
                total = total,
                unread = published,
                "Initial SMS check complete"
            );
        } else if total > baseline {
            info!(new = total - baseline, "Found new SMS messages");
            for message in &messages[baseline..] {
                self.publisher.publish_sms_received(message).await;
                published += 1;

                if self.auto_delete && message.state.is_received() {
                    match self
                        .operations
                        .track("deleteSms", self.modem.delete_sms(message))
                        .await
                    {
                        Ok(()) => info!(locations = ?message.locations, "Auto-deleted SMS"),
                        Err(e) => error!(error = %e, "Error deleting SMS"),
                    }
                }
            }

            if self.auto_delete && total > 0 {
                match self
                    .operations
                    .track("GetSMSStatus", self.modem.sms_status())
                    .await
                {
                    Ok(capacity) => self.publisher.publish_capacity(&capacity).await,
                    Err(e) => warn!(error = %e, "Could not update SMS capacity"),
                }
            }
        } else {
            debug!(total = total, "No new SMS");
        }

        let mut state = self.lock_state();
        state.baseline = if self.auto_delete && !first_run {
            0
        } else {
            total
        };
        state.first_run = false;
        Ok(published)
    }

    /// Poll until `cancel` flips to true or its sender goes away
    pub async fn run(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "SMS monitoring started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Error in SMS monitoring");
                    }
                }
            }
        }
        info!("SMS monitoring stopped");
    }
}
