//! Device status driven by real modem operations


use sms_gateway::gateway::{DeviceStatus, StatusReporter};
use sms_gateway::modem::{Modem, ModemError};
use sms_gateway::testing::{MockModem, MockTransport};
use test_helpers::{topic, Harness};

fn reporter(h: &Harness) -> StatusReporter<MockTransport> {
    StatusReporter::new(
        h.modem.clone() as std::sync::Arc<dyn Modem>,
        h.operations.clone(),
        h.publisher.clone(),
    )
}

#[tokio::test]
async fn test_offline_when_modem_never_answers() {
    let modem = MockModem::new();
    modem.fail("signal_quality", ModemError::Disconnected);
    let h = Harness::with_modem(modem, None);

    let result = reporter(&h).publish_periodic().await;

    assert_eq!(result, Err(ModemError::Disconnected));
    let statuses = h.transport.payloads_on(&topic("device_status/state")).await;
    let last = statuses.last().unwrap();
    assert_eq!(last["status"], "offline");
    assert_eq!(last["consecutive_failures"], 1);
    assert_eq!(last["last_error"], "GetSignalQuality: modem connection closed");
    assert!(last["last_seen"].is_null());
    // network is skipped once signal fails
    assert_eq!(h.modem.call_count("network_info"), 0);
}

#[tokio::test]
async fn test_stays_online_through_failures_after_success() {
    let h = Harness::new();
    let reporter = reporter(&h);
    reporter.publish_periodic().await.unwrap();
    assert_eq!(h.connectivity.status(), DeviceStatus::Online);

    h.modem.fail("signal_quality", ModemError::Rejected);
    for _ in 0..3 {
        assert!(reporter.publish_periodic().await.is_err());
    }

    let snapshot = h.connectivity.snapshot();
    assert_eq!(snapshot.status, DeviceStatus::Online);
    assert_eq!(snapshot.consecutive_failures, 3);
    assert_eq!(snapshot.successful_operations, 2);

    h.modem.clear_failures();
    reporter.publish_periodic().await.unwrap();
    let statuses = h.transport.payloads_on(&topic("device_status/state")).await;
    let last = statuses.last().unwrap();
    assert_eq!(last["consecutive_failures"], 0);
    assert!(last["last_error"].is_null());
    assert!(last["last_seen"].is_string());
}

#[tokio::test]
async fn test_every_tracked_operation_republishes_status() {
    let h = Harness::new();

    reporter(&h).publish_periodic().await.unwrap();

    let statuses = h.transport.payloads_on(&topic("device_status/state")).await;
    assert_eq!(statuses.len(), 2);
    let signal = h.transport.payloads_on(&topic("signal/state")).await;
    assert_eq!(signal.len(), 1);
    let network = h.transport.payloads_on(&topic("network/state")).await;
    assert_eq!(network[0]["NetworkName"], "Mock Mobile");
}
