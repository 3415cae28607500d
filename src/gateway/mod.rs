//! The SMS gateway proper
//!
//! Modem state tracking, command handling, SMS polling and the lifecycle that
//! ties them to the broker connection.

pub mod connectivity;
pub mod counter;
pub mod dispatcher;
pub mod lifecycle;
pub mod poller;
pub mod publisher;
pub mod status;
pub mod tracker;

pub use connectivity::{ConnectivityTracker, DeviceStatus, StatusSnapshot};
pub use counter::SentCounter;
pub use dispatcher::{CommandDispatcher, PendingCommand};
pub use lifecycle::{GatewayLifecycle, LifecycleError};
pub use poller::SmsPoller;
pub use publisher::StatePublisher;
pub use status::StatusReporter;
pub use tracker::OperationTracker;
