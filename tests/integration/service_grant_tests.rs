//! Service grants over an established session.

use crate::mock_radio::{Harness, recorder, sorc, sorc_id};

use secure_access::AccessConfig;
use secure_access::events::AccessEvent;
use secure_access::protocol::SorcMessageId;
use secure_access::protocol::message::ServiceGrantStatus;
use secure_access::session::{RequestFailedError, ServiceGrantAction};

#[test]
fn request_is_answered_and_cleared() {
    let mut h = Harness::connected(sorc());
    let (seen, f) = recorder();
    h.manager.service_grant_change().subscribe(f);

    assert!(h.manager.request_service_grant(2));
    assert_eq!(
        seen.borrow().last().map(|c| c.state.requesting_service_grant_ids.clone()),
        Some(vec![2])
    );
    h.pump();

    let last = seen.borrow().last().cloned().unwrap();
    assert!(last.state.requesting_service_grant_ids.is_empty());
    let ServiceGrantAction::ResponseReceived(response) = last.action else {
        panic!("expected a response");
    };
    assert_eq!(response.sorc_id, sorc_id());
    assert_eq!(response.service_grant_id, 2);
    assert_eq!(response.status, ServiceGrantStatus::Success);
}

#[test]
fn response_text_and_status_come_through() {
    let mut h = Harness::connected(
        sorc().with_grant_reply(ServiceGrantStatus::InvalidTimeFrame, "LOCKED\r\n"),
    );
    let (seen, f) = recorder();
    h.manager.service_grant_change().subscribe(f);

    h.manager.request_service_grant(3);
    h.pump();

    let ServiceGrantAction::ResponseReceived(response) = seen.borrow().last().cloned().unwrap().action
    else {
        panic!("expected a response");
    };
    assert_eq!(response.status, ServiceGrantStatus::InvalidTimeFrame);
    assert_eq!(response.response_data, "LOCKED");
}

#[test]
fn requests_go_out_one_at_a_time() {
    let mut h = Harness::connected(sorc().holding_grants());

    for id in [10, 11, 12] {
        assert!(h.manager.request_service_grant(id));
    }
    h.pump();
    let on_wire = |h: &mut Harness| {
        h.sorc()
            .received_ids()
            .into_iter()
            .filter(|id| *id == SorcMessageId::ServiceGrant)
            .count()
    };
    assert_eq!(on_wire(&mut h), 1);

    let reply = h.sorc().grant_response(10, ServiceGrantStatus::Success, "");
    h.deliver(reply);
    h.pump();
    assert_eq!(on_wire(&mut h), 2);

    let reply = h.sorc().grant_response(11, ServiceGrantStatus::Success, "");
    h.deliver(reply);
    h.pump();
    assert_eq!(on_wire(&mut h), 3);
}

#[test]
fn queue_overflow_rejects_without_dropping_the_session() {
    let config = AccessConfig {
        max_enqueued_messages: 3,
        ..AccessConfig::default()
    };
    let mut h = Harness::with_config(sorc().holding_grants(), config);
    h.manager.handle_bluetooth_state(true);
    h.connect(1);

    let accepted: Vec<bool> = (0..6).map(|id| h.manager.request_service_grant(id)).collect();
    // One on the wire plus three queued.
    assert_eq!(accepted, vec![true, true, true, true, false, false]);
    assert!(h.manager.connection_state().is_connected());
    assert_eq!(
        h.sink().count(|e| matches!(
            e,
            AccessEvent::ServiceGrantRequested { accepted: false, .. }
        )),
        2
    );
}

#[test]
fn corrupt_answer_fails_request_and_sends_heartbeat() {
    let mut h = Harness::connected(sorc().holding_grants());
    let (seen, f) = recorder();
    h.manager.service_grant_change().subscribe(f);

    h.manager.request_service_grant(1);
    h.manager.request_service_grant(2);
    h.pump();

    // A short trigger decrypts fine but does not parse.
    let bad = h.sorc().notify(&secure_access::protocol::SorcMessage::new(
        SorcMessageId::ServiceGrantTrigger,
        vec![0x01],
    ));
    h.deliver(bad);
    h.pump();

    let last = seen.borrow().last().cloned().unwrap();
    assert_eq!(
        last.action,
        ServiceGrantAction::RequestFailed(RequestFailedError::ReceivedInvalidData)
    );
    assert!(last.state.requesting_service_grant_ids.is_empty());
    assert_eq!(
        h.sorc().received_ids().last(),
        Some(&SorcMessageId::HeartbeatRequest)
    );
    assert!(h.manager.connection_state().is_connected());
}

#[test]
fn write_failure_reports_sending_failed() {
    let mut h = Harness::connected(sorc().holding_grants());
    let (seen, f) = recorder();
    h.manager.service_grant_change().subscribe(f);

    h.manager.port_mut().set_fail_writes(true);
    assert!(h.manager.request_service_grant(9));

    assert!(seen.borrow().iter().any(|c| c.action
        == ServiceGrantAction::RequestFailed(RequestFailedError::SendingFailed)));
    assert!(h.sink().events.contains(&AccessEvent::ServiceGrantFailed {
        sorc_id: sorc_id(),
        error: RequestFailedError::SendingFailed
    }));
}

#[test]
fn not_connected_requests_are_refused() {
    let mut h = Harness::discovered(sorc());
    assert!(!h.manager.request_service_grant(1));
}

#[test]
fn disconnect_resets_pending_grants() {
    let mut h = Harness::connected(sorc().holding_grants());
    h.manager.request_service_grant(4);
    h.pump();
    let (seen, f) = recorder();
    h.manager.service_grant_change().subscribe(f);

    h.manager.disconnect();

    let last = seen.borrow().last().cloned().unwrap();
    assert_eq!(last.action, ServiceGrantAction::Reset);
    assert!(last.state.requesting_service_grant_ids.is_empty());
}
