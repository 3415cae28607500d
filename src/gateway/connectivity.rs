//! Modem connectivity tracking
//!
//! The modem counts as online only after at least one successful operation
//! and while the last success is within the offline timeout. Failures never
//! flip the status directly; they only age the last success.

use crate::protocol::TIMESTAMP_FORMAT;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Reason recorded when a failure carries no description
pub const DEFAULT_FAILURE_REASON: &str = "Communication failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Payload of `P/device_status/state`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: DeviceStatus,
    pub consecutive_failures: u32,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub last_error: Option<String>,
    pub last_seen: Option<String>,
    pub seconds_since_last_success: Option<i64>,
}

#[derive(Debug, Default)]
struct Record {
    last_success_at: Option<DateTime<Local>>,
    consecutive_failures: u32,
    last_error: Option<String>,
    total_operations: u64,
    successful_operations: u64,
    initial_check_done: bool,
}

impl Record {
    fn status_at(&self, now: DateTime<Local>, offline_timeout: Duration) -> DeviceStatus {
        if !self.initial_check_done {
            return DeviceStatus::Offline;
        }
        let Some(last_success_at) = self.last_success_at else {
            return DeviceStatus::Offline;
        };
        // A clock that jumped backwards counts as "just now"
        let elapsed = (now - last_success_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed > offline_timeout {
            DeviceStatus::Offline
        } else {
            DeviceStatus::Online
        }
    }
}

/// Shared online/offline state derived from modem operation outcomes
#[derive(Debug)]
pub struct ConnectivityTracker {
    offline_timeout: Duration,
    record: Mutex<Record>,
}

impl ConnectivityTracker {
    pub fn new(offline_timeout: Duration) -> Self {
        Self {
            offline_timeout,
            record: Mutex::new(Record::default()),
        }
    }

    pub fn offline_timeout(&self) -> Duration {
        self.offline_timeout
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_success(&self) {
        self.record_success_at(Local::now());
    }

    pub fn record_success_at(&self, now: DateTime<Local>) {
        let mut record = self.lock();
        record.last_success_at = Some(now);
        record.consecutive_failures = 0;
        record.last_error = None;
        record.total_operations += 1;
        record.successful_operations += 1;
        record.initial_check_done = true;
    }

    pub fn record_failure(&self, reason: Option<String>) {
        let mut record = self.lock();
        record.consecutive_failures += 1;
        record.total_operations += 1;
        record.last_error = Some(
            reason
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string()),
        );
    }

    /// Report offline until the next success; used on shutdown
    pub fn force_offline(&self) {
        self.lock().initial_check_done = false;
    }

    pub fn status(&self) -> DeviceStatus {
        self.status_at(Local::now())
    }

    pub fn status_at(&self, now: DateTime<Local>) -> DeviceStatus {
        self.lock().status_at(now, self.offline_timeout)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot_at(Local::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Local>) -> StatusSnapshot {
        let record = self.lock();
        StatusSnapshot {
            status: record.status_at(now, self.offline_timeout),
            consecutive_failures: record.consecutive_failures,
            total_operations: record.total_operations,
            successful_operations: record.successful_operations,
            last_error: record.last_error.clone(),
            last_seen: record
                .last_success_at
                .map(|at| at.format(TIMESTAMP_FORMAT).to_string()),
            seconds_since_last_success: record
                .last_success_at
                .map(|at| (now - at).num_seconds()),
        }
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}
