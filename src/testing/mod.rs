//! Mock transport and modem
//!
//! Lets unit and integration tests drive the gateway without an MQTT broker
//! or a GSM modem.

pub mod mocks;

pub use mocks::{stored_sms, MockModem, MockTransport, PublishedMessage};
