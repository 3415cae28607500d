//! Modem operation tracking
//!
//! Every modem call goes through [`OperationTracker::track`], which feeds the
//! outcome into the connectivity tracker and republishes the device status.

use super::connectivity::ConnectivityTracker;
use super::publisher::StatePublisher;
use crate::transport::Transport;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

pub struct OperationTracker<T: Transport + 'static> {
    connectivity: Arc<ConnectivityTracker>,
    publisher: Arc<StatePublisher<T>>,
}

impl<T: Transport + 'static> OperationTracker<T> {
    pub fn new(connectivity: Arc<ConnectivityTracker>, publisher: Arc<StatePublisher<T>>) -> Self {
        Self {
            connectivity,
            publisher,
        }
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityTracker> {
        &self.connectivity
    }

    /// Run one modem operation; the error is returned unchanged
    pub async fn track<R, E, F>(&self, operation: &str, call: F) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        E: Display,
    {
        match call.instrument(crate::modem_span!(operation = %operation)).await {
            Ok(result) => {
                self.connectivity.record_success();
                self.publisher.publish_device_status().await;
                debug!(operation = %operation, "Modem operation succeeded");
                Ok(result)
            }
            Err(e) => {
                self.connectivity
                    .record_failure(Some(format!("{operation}: {e}")));
                self.publisher.publish_device_status().await;
                warn!(operation = %operation, error = %e, "Modem operation failed");
                Err(e)
            }
        }
    }
}
