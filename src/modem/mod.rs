//! Modem driver boundary
//!
//! The gateway only talks to the modem through the [`Modem`] trait. The trait
//! mirrors the primitives a GSM driver offers (send, list, delete, and the
//! signal/network/SIM queries); [`at::AtModem`] implements it over AT commands
//! and [`crate::testing::MockModem`] implements it for tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod at;
pub mod pdu;

pub use at::AtModem;
pub use pdu::{needs_unicode, DataCoding, OutgoingSms, PduError, SmsSubmit};

/// Storage state of a message as reported by the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmsState {
    Read,
    UnRead,
    Sent,
    UnSent,
}

impl SmsState {
    /// Map the numeric `<stat>` of `+CMGL` in PDU mode
    pub fn from_pdu_stat(stat: u8) -> Option<Self> {
        match stat {
            0 => Some(SmsState::UnRead),
            1 => Some(SmsState::Read),
            2 => Some(SmsState::UnSent),
            3 => Some(SmsState::Sent),
            _ => None,
        }
    }

    /// Received messages, the only ones eligible for auto-delete
    pub fn is_received(&self) -> bool {
        matches!(self, SmsState::Read | SmsState::UnRead)
    }
}

/// One message stored on the modem
///
/// Concatenated messages are linked into a single entry that remembers every
/// storage location it occupies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SmsMessage {
    #[serde(skip)]
    pub locations: Vec<u32>,
    pub number: String,
    pub text: String,
    pub state: SmsState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
}

/// SMS service center used for an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Smsc {
    /// Explicit service center number
    Number(String),
    /// SMSC stored on the SIM at the given location
    Location(u8),
}

impl Smsc {
    /// Configured number when present, otherwise the SIM default at location 1
    pub fn from_config(configured: Option<&str>) -> Self {
        match configured.map(str::trim).filter(|number| !number.is_empty()) {
            Some(number) => Smsc::Number(number.to_string()),
            None => Smsc::Location(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalQuality {
    /// dBm, -1 when unknown
    pub signal_strength: i32,
    /// 0-100, -1 when unknown
    pub signal_percent: i32,
    /// raw RXQUAL class, -1 when unknown
    pub bit_error_rate: i32,
}

impl SignalQuality {
    /// Convert the `+CSQ: <rssi>,<ber>` pair
    pub fn from_csq(rssi: u8, ber: u8) -> Self {
        let (signal_strength, signal_percent) = if rssi > 31 {
            (-1, -1)
        } else {
            (-113 + 2 * rssi as i32, rssi as i32 * 100 / 31)
        };
        let bit_error_rate = if ber > 7 { -1 } else { ber as i32 };
        Self {
            signal_strength,
            signal_percent,
            bit_error_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkInfo {
    pub network_name: String,
    pub network_code: String,
    pub state: String,
    #[serde(rename = "LAC", skip_serializing_if = "Option::is_none")]
    pub lac: Option<String>,
    #[serde(rename = "CID", skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsCapacity {
    #[serde(rename = "SIMUsed")]
    pub sim_used: u32,
    #[serde(rename = "SIMSize")]
    pub sim_size: u32,
}

/// Failure classes callers distinguish when reporting send errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Generic send failure: SIM, signal or device problem
    SendFailed,
    /// Not registered to a network
    NetworkRegistration,
    /// No usable SMS service center
    SmscUnknown,
    Other,
}

/// Modem driver errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModemError {
    #[error("modem did not answer within {0:?}")]
    Timeout(Duration),
    #[error("modem I/O error: {0}")]
    Io(String),
    #[error("modem connection closed")]
    Disconnected,
    #[error("+CME ERROR: {0}")]
    Equipment(u16),
    #[error("+CMS ERROR: {0}")]
    Message(u16),
    #[error("modem returned ERROR")]
    Rejected,
    #[error("unexpected modem response: {0}")]
    Protocol(String),
    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),
}

impl From<std::io::Error> for ModemError {
    fn from(err: std::io::Error) -> Self {
        ModemError::Io(err.to_string())
    }
}

impl ModemError {
    /// Classify the error for user-facing reporting
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ModemError::Message(330) => FailureKind::SmscUnknown,
            ModemError::Message(331) | ModemError::Message(332) => {
                FailureKind::NetworkRegistration
            }
            ModemError::Equipment(30) | ModemError::Equipment(31) => {
                FailureKind::NetworkRegistration
            }
            ModemError::Message(500)
            | ModemError::Rejected
            | ModemError::Timeout(_)
            | ModemError::Disconnected => FailureKind::SendFailed,
            _ => FailureKind::Other,
        }
    }
}

/// GSM modem driver primitives
#[async_trait::async_trait]
pub trait Modem: Send + Sync {
    /// Submit one encoded part; returns the network message reference
    async fn send_sms(&self, part: &SmsSubmit) -> Result<u8, ModemError>;

    async fn signal_quality(&self) -> Result<SignalQuality, ModemError>;

    async fn network_info(&self) -> Result<NetworkInfo, ModemError>;

    async fn imei(&self) -> Result<String, ModemError>;

    async fn manufacturer(&self) -> Result<String, ModemError>;

    async fn model(&self) -> Result<String, ModemError>;

    async fn firmware(&self) -> Result<String, ModemError>;

    async fn sim_imsi(&self) -> Result<String, ModemError>;

    /// SIM message storage usage
    async fn sms_status(&self) -> Result<SmsCapacity, ModemError>;

    /// Every message in storage, in storage order, concatenated parts linked
    async fn retrieve_all_sms(&self) -> Result<Vec<SmsMessage>, ModemError>;

    /// Delete a message from every location it occupies
    async fn delete_sms(&self, message: &SmsMessage) -> Result<(), ModemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smsc_from_config() {
        assert_eq!(Smsc::from_config(None), Smsc::Location(1));
        assert_eq!(Smsc::from_config(Some("  ")), Smsc::Location(1));
        assert_eq!(
            Smsc::from_config(Some(" 12345 ")),
            Smsc::Number("12345".to_string())
        );
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            ModemError::Message(330).failure_kind(),
            FailureKind::SmscUnknown
        );
        assert_eq!(
            ModemError::Message(331).failure_kind(),
            FailureKind::NetworkRegistration
        );
        assert_eq!(
            ModemError::Equipment(30).failure_kind(),
            FailureKind::NetworkRegistration
        );
        assert_eq!(ModemError::Rejected.failure_kind(), FailureKind::SendFailed);
        assert_eq!(
            ModemError::Timeout(Duration::from_secs(1)).failure_kind(),
            FailureKind::SendFailed
        );
        assert_eq!(ModemError::Equipment(10).failure_kind(), FailureKind::Other);
    }

    #[test]
    fn test_signal_quality_from_csq() {
        let signal = SignalQuality::from_csq(31, 0);
        assert_eq!(signal.signal_strength, -51);
        assert_eq!(signal.signal_percent, 100);
        assert_eq!(signal.bit_error_rate, 0);

        let unknown = SignalQuality::from_csq(99, 99);
        assert_eq!(unknown.signal_strength, -1);
        assert_eq!(unknown.signal_percent, -1);
        assert_eq!(unknown.bit_error_rate, -1);
    }

    #[test]
    fn test_sms_message_serializes_without_locations() {
        let message = SmsMessage {
            locations: vec![3, 4],
            number: "+420123456789".to_string(),
            text: "Ahoj".to_string(),
            state: SmsState::UnRead,
            date_time: None,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["Number"], "+420123456789");
        assert_eq!(json["Text"], "Ahoj");
        assert_eq!(json["State"], "UnRead");
        assert!(json.get("Locations").is_none());
        assert!(json.get("DateTime").is_none());
    }

    #[test]
    fn test_capacity_serializes_with_sim_keys() {
        let json = serde_json::to_value(SmsCapacity {
            sim_used: 3,
            sim_size: 30,
        })
        .unwrap();
        assert_eq!(json["SIMUsed"], 3);
        assert_eq!(json["SIMSize"], 30);
    }
}
