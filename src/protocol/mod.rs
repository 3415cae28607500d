//! MQTT protocol surface of the gateway
//!
//! Topic layout, JSON payload shapes and Home Assistant discovery configs.

pub mod discovery;
pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
