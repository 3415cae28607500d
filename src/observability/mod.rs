//! Observability: structured logging and the health check endpoint

pub mod health;
pub mod logging;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, init_logging_with_verbosity, LogFormat};

pub use logging::{lifecycle_span, modem_span, mqtt_span};
