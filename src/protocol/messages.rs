//! JSON payloads exchanged over MQTT
//!
//! Field names follow what Home Assistant templates already reference
//! (`value_json.SignalPercent`, `value_json.count`, ...), so modem payloads
//! keep their PascalCase keys while gateway payloads use snake_case.

use crate::modem::SmsMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local wall-clock format used in every payload timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn local_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Literal payload every button press carries
pub const BUTTON_PRESS: &str = "PRESS";

/// `P/send` command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendCommand {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub text: String,
    /// Explicit encoding choice; auto-detected when absent
    #[serde(default)]
    pub unicode: Option<bool>,
}

/// Why a `P/send` payload was rejected
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid JSON in SMS send command: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("SMS send command missing required fields: number or text")]
    MissingFields,
}

impl SendCommand {
    /// Parse a payload, rejecting malformed JSON and blank number or text
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let command: SendCommand = serde_json::from_slice(payload)?;
        if command.number.is_empty() || command.text.is_empty() {
            return Err(CommandError::MissingFields);
        }
        Ok(command)
    }
}

/// Outcome published on `P/send_status`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendStatus {
    Success {
        number: String,
        text: String,
        timestamp: String,
    },
    Error {
        error: String,
        number: String,
        text: String,
        timestamp: String,
    },
    MissingFields {
        message: String,
        timestamp: String,
    },
}

/// Outcome published on `P/delete_sms_status`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteStatus {
    Success {
        deleted_count: usize,
        timestamp: String,
    },
    Error {
        error: String,
        timestamp: String,
    },
}

/// `P/sms_counter/state`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterState {
    pub count: u64,
    pub cost: f64,
}

impl CounterState {
    /// Cost rounded to two decimals
    pub fn new(count: u64, cost_per_message: f64) -> Self {
        let cost = (count as f64 * cost_per_message * 100.0).round() / 100.0;
        Self { count, cost }
    }
}

/// `P/modem_info/state`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModemInfo {
    #[serde(rename = "IMEI")]
    pub imei: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
}

/// `P/sim_info/state`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimInfo {
    #[serde(rename = "IMSI")]
    pub imsi: String,
}

/// `P/sms/state`: the stored message plus the time it was published
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedSms<'a> {
    #[serde(flatten)]
    pub message: &'a SmsMessage,
    pub timestamp: String,
}

/// Last-will payload for `P/device_status/state`
pub fn offline_will_payload() -> Vec<u8> {
    serde_json::json!({ "status": "offline" }).to_string().into_bytes()
}
