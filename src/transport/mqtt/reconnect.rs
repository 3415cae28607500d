//! Reconnect policy and connection state transitions
//!
//! Nothing here touches the network. The supervisor in [`super::client`]
//! asks the policy what to do after a lost connection and feeds broker
//! events through [`ConnectionEvent::into_state`].

use super::connection::ConnectionState;
use std::time::Duration;
use tracing::{error, info, warn};

/// Exponential backoff between reconnect attempts
///
/// The delay doubles from `initial_delay` until it reaches `max_delay`.
/// The broker usually lives on the same host, so the gateway retries
/// forever unless `max_attempts` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// How long `connect` waits for the first ConnAck
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            max_attempts: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << doublings)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// What to do after `attempts_so_far` failed reconnects
    pub fn decide(&self, attempts_so_far: u32, shutdown_requested: bool) -> ReconnectDecision {
        if shutdown_requested {
            return ReconnectDecision::Stop;
        }
        if self
            .max_attempts
            .is_some_and(|max_attempts| attempts_so_far >= max_attempts)
        {
            return ReconnectDecision::GiveUp;
        }
        let attempt = attempts_so_far + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    /// Shutdown was requested; leave quietly
    Stop,
    /// The attempt budget is spent
    GiveUp,
}

/// Something the event loop observed about the broker connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAck,
    BrokerDisconnect,
    NetworkError(String),
    RetryScheduled(u32),
    GaveUp(String),
}

impl ConnectionEvent {
    /// State the connection moves to after this event
    pub fn into_state(self) -> ConnectionState {
        match self {
            ConnectionEvent::ConnAck => {
                info!("Connected to MQTT broker");
                ConnectionState::Connected
            }
            ConnectionEvent::BrokerDisconnect => {
                warn!("Disconnected from MQTT broker");
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(reason) => {
                error!(error = %reason, "MQTT connection lost");
                ConnectionState::Disconnected(reason)
            }
            ConnectionEvent::RetryScheduled(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::GaveUp(reason) => {
                error!(reason = %reason, "Giving up on MQTT broker");
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }
}
