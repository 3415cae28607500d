//! SMS poller cycles against a mock SIM


use sms_gateway::modem::{ModemError, SmsState};
use sms_gateway::testing::{stored_sms, MockModem};
use std::sync::Arc;
use test_helpers::{topic, Harness};
use tokio::sync::watch;

fn three_messages() -> MockModem {
    MockModem::with_messages(vec![
        stored_sms(1, "+1", "old", SmsState::Read),
        stored_sms(2, "+2", "new", SmsState::UnRead),
        stored_sms(3, "+3", "mine", SmsState::Sent),
    ])
}

#[tokio::test]
async fn test_first_cycle_publishes_only_unread() {
    let h = Harness::with_modem(three_messages(), None);
    let poller = h.poller(false);

    let published = poller.poll_once().await.unwrap();

    assert_eq!(published, 1);
    assert_eq!(poller.baseline(), 3);
    let sms = h.transport.payloads_on(&topic("sms/state")).await;
    assert_eq!(sms.len(), 1);
    assert_eq!(sms[0]["Number"], "+2");
    assert_eq!(sms[0]["Text"], "new");
    assert_eq!(sms[0]["State"], "UnRead");
    assert!(sms[0]["timestamp"].is_string());
    let raw = h.transport.get_published_messages().await;
    assert!(raw
        .iter()
        .filter(|m| m.topic == topic("sms/state"))
        .all(|m| !m.retain));
}

#[tokio::test]
async fn test_later_cycle_publishes_new_indices() {
    let h = Harness::with_modem(three_messages(), None);
    let poller = h.poller(false);
    poller.poll_once().await.unwrap();
    h.transport.clear_history().await;

    h.modem
        .push_message(stored_sms(4, "+4", "fourth", SmsState::UnRead));
    h.modem
        .push_message(stored_sms(5, "+5", "fifth", SmsState::Read));
    let published = poller.poll_once().await.unwrap();

    assert_eq!(published, 2);
    assert_eq!(poller.baseline(), 5);
    let sms = h.transport.payloads_on(&topic("sms/state")).await;
    assert_eq!(sms[0]["Text"], "fourth");
    assert_eq!(sms[1]["Text"], "fifth");
    assert!(h.modem.deleted_locations().is_empty());
}

#[tokio::test]
async fn test_auto_delete_removes_published_and_resets_baseline() {
    let h = Harness::with_modem(three_messages(), None);
    let poller = h.poller(true);
    poller.poll_once().await.unwrap();
    assert_eq!(poller.baseline(), 3);

    h.modem
        .push_message(stored_sms(4, "+4", "fourth", SmsState::UnRead));
    h.modem
        .push_message(stored_sms(5, "+5", "fifth", SmsState::Read));
    let published = poller.poll_once().await.unwrap();

    assert_eq!(published, 2);
    assert_eq!(h.modem.deleted_locations(), vec![4, 5]);
    assert_eq!(poller.baseline(), 0);
    let capacity = h.transport.payloads_on(&topic("sms_capacity/state")).await;
    assert_eq!(capacity.last().unwrap()["SIMUsed"], 3);
}

#[tokio::test]
async fn test_auto_delete_skips_sent_messages() {
    let h = Harness::with_modem(MockModem::new(), None);
    let poller = h.poller(true);
    poller.poll_once().await.unwrap();

    h.modem
        .push_message(stored_sms(7, "+7", "outbox", SmsState::UnSent));
    poller.poll_once().await.unwrap();

    assert!(h.modem.deleted_locations().is_empty());
}

#[tokio::test]
async fn test_no_change_publishes_nothing() {
    let h = Harness::with_modem(three_messages(), None);
    let poller = h.poller(false);
    poller.poll_once().await.unwrap();
    h.transport.clear_history().await;

    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert!(h.transport.payloads_on(&topic("sms/state")).await.is_empty());
}

#[tokio::test]
async fn test_retrieve_failure_is_reported_and_tracked() {
    let modem = three_messages();
    modem.fail("retrieve_all_sms", ModemError::Timeout(std::time::Duration::from_secs(10)));
    let h = Harness::with_modem(modem, None);
    let poller = h.poller(false);

    let result = poller.poll_once().await;

    assert!(result.is_err());
    assert_eq!(h.connectivity.snapshot().consecutive_failures, 1);
    assert!(h
        .connectivity
        .snapshot()
        .last_error
        .unwrap()
        .starts_with("retrieveAllSms: "));
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let h = Harness::with_modem(three_messages(), None);
    let poller = Arc::new(h.poller(false));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let handle = tokio::spawn(poller.clone().run(cancel_rx));
    assert!(
        test_helpers::eventually(|| async { h.modem.call_count("retrieve_all_sms") >= 1 }).await
    );
    cancel_tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("poller should stop")
        .unwrap();
    assert_eq!(poller.baseline(), 3);
}
