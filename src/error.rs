//! Top-level error types for the SMS gateway
//!
//! Component errors (configuration, transport, modem) stay in their own modules;
//! this module aggregates them for the binary and the lifecycle.

use crate::modem::ModemError;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Modem error: {0}")]
    ModemError(#[from] ModemError),

    #[error("Lifecycle error: {0}")]
    LifecycleError(#[from] crate::gateway::lifecycle::LifecycleError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl GatewayError {
    /// Wrap any transport error
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TransportError(Box::new(error))
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
