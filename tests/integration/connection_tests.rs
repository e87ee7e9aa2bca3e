//! Connection lifecycle through the public facade.

use crate::mock_radio::{Harness, blob, recorder, sorc, sorc_id, token};

use secure_access::connection::{
    ConnectingFailedError, ConnectingState, ConnectionAction, ConnectionLostError,
    SecureConnectionState,
};
use secure_access::error::ChallengeError;
use secure_access::events::AccessEvent;
use secure_access::ports::PhysicalEvent;
use secure_access::protocol::SorcMessageId;

#[test]
fn connect_walks_physical_transport_challenging_connected() {
    let mut h = Harness::discovered(sorc());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.connect(1);

    let id = sorc_id();
    let states: Vec<_> = seen.borrow().iter().map(|c| c.state).collect();
    assert_eq!(
        states,
        vec![
            SecureConnectionState::Disconnected,
            SecureConnectionState::Connecting {
                sorc_id: id,
                state: ConnectingState::Physical
            },
            SecureConnectionState::Connecting {
                sorc_id: id,
                state: ConnectingState::Transport
            },
            SecureConnectionState::Connecting {
                sorc_id: id,
                state: ConnectingState::Challenging
            },
            SecureConnectionState::Connected { sorc_id: id },
        ]
    );
    assert_eq!(h.manager.port().connects(), &[id]);
    assert!(h.sorc().is_authenticated());
}

#[test]
fn late_subscriber_gets_current_state_replayed() {
    let mut h = Harness::connected(sorc());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].action, ConnectionAction::Initial);
    assert_eq!(
        seen[0].state,
        SecureConnectionState::Connected { sorc_id: sorc_id() }
    );
}

#[test]
fn radio_refusing_the_link_is_connecting_failed() {
    let mut h = Harness::discovered(sorc());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.manager.connect_to_sorc(token(), blob(1));
    h.manager
        .handle_physical_event(PhysicalEvent::ConnectingFailed(sorc_id()));

    assert_eq!(
        seen.borrow().last().map(|c| c.action),
        Some(ConnectionAction::ConnectingFailed {
            sorc_id: sorc_id(),
            error: ConnectingFailedError::PhysicalConnectingFailed
        })
    );
    assert!(h.sink().events.contains(&AccessEvent::ConnectingFailed {
        sorc_id: sorc_id(),
        error: ConnectingFailedError::PhysicalConnectingFailed
    }));
}

#[test]
fn large_mtu_sends_challenge_in_one_frame() {
    let mut h = Harness::discovered(sorc().with_mtu(155));
    h.connect(1);
    assert!(h.manager.connection_state().is_connected());
    // MTU request, challenge and b3 each fit one write.
    assert_eq!(
        h.sorc().received_ids(),
        vec![
            SorcMessageId::MtuRequest,
            SorcMessageId::ChallengePhone,
            SorcMessageId::ChallengePhoneResponse
        ]
    );
}

#[test]
fn forged_sorc_is_rejected_with_challenge_failed() {
    let mut h = Harness::discovered(sorc().with_forged_response());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.connect(1);

    assert_eq!(h.manager.connection_state(), SecureConnectionState::Disconnected);
    assert_eq!(
        seen.borrow().last().map(|c| c.action),
        Some(ConnectionAction::ConnectingFailed {
            sorc_id: sorc_id(),
            error: ConnectingFailedError::ChallengeFailed(Some(ChallengeError::ResponseDoNotMatch))
        })
    );
}

#[test]
fn rejection_that_cannot_be_written_still_fails_connecting() {
    let mut h = Harness::discovered(sorc().with_forged_response());
    h.manager.connect_to_sorc(token(), blob(1));
    h.manager
        .handle_physical_event(PhysicalEvent::Connected(sorc_id()));

    // Radio dies right after the challenge reaches the SORC.
    while let Some(frame) = h.manager.port_mut().take_write() {
        let replies = h.sorc().receive_frame(&frame);
        h.manager.handle_frame_sent(Ok(()));
        if h.sorc().received_ids().contains(&SorcMessageId::ChallengePhone) {
            h.manager.port_mut().set_fail_writes(true);
        }
        h.deliver(replies);
    }

    let failed = ConnectingFailedError::ChallengeFailed(Some(ChallengeError::ResponseDoNotMatch));
    assert_eq!(h.manager.connection_state(), SecureConnectionState::Disconnected);
    assert!(h.sink().events.contains(&AccessEvent::ConnectingFailed {
        sorc_id: sorc_id(),
        error: failed
    }));

    // Nothing is left half-open: the next attempt reaches the radio.
    h.manager.port_mut().set_fail_writes(false);
    h.manager.connect_to_sorc(token(), blob(1));
    assert_eq!(h.manager.port().connects(), &[sorc_id(), sorc_id()]);
    assert!(h.manager.connection_state().sorc_id().is_some());
}

#[test]
fn short_sorc_response_is_reported_as_corrupt() {
    let mut h = Harness::discovered(sorc().with_corrupt_response());
    h.connect(1);

    assert!(h.sink().events.contains(&AccessEvent::ConnectingFailed {
        sorc_id: sorc_id(),
        error: ConnectingFailedError::ChallengeFailed(Some(ChallengeError::ResponseIsCorrupt))
    }));
}

#[test]
fn stale_blob_is_blob_outdated() {
    let mut h = Harness::discovered(sorc().requiring_blob(10));
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.connect(4);

    assert_eq!(
        seen.borrow().last().map(|c| c.action),
        Some(ConnectionAction::ConnectingFailed {
            sorc_id: sorc_id(),
            error: ConnectingFailedError::BlobOutdated
        })
    );
}

#[test]
fn fresh_blob_is_pushed_before_the_session_starts() {
    let mut h = Harness::discovered(sorc().requiring_blob(10));
    h.connect(11);

    assert!(h.manager.connection_state().is_connected());
    let blob = h
        .sorc()
        .received()
        .iter()
        .find(|m| m.id == SorcMessageId::LtBlob)
        .cloned()
        .expect("blob pushed");
    assert_eq!(blob.payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn user_disconnect_wins_and_drops_the_sorc_from_discovery() {
    let mut h = Harness::connected(sorc());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.manager.disconnect();

    assert_eq!(
        seen.borrow().last().map(|c| c.action),
        Some(ConnectionAction::Disconnect)
    );
    assert_eq!(h.manager.port().disconnects(), 1);
    assert!(!h.manager.discovery_change().state().contains(&sorc_id()));
}

#[test]
fn link_loss_is_connection_lost() {
    let mut h = Harness::connected(sorc());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.manager
        .handle_physical_event(PhysicalEvent::ConnectionLost(sorc_id()));

    assert_eq!(
        seen.borrow().last().map(|c| c.action),
        Some(ConnectionAction::ConnectionLost {
            error: ConnectionLostError::PhysicalConnectionLost
        })
    );
    assert!(h.sink().events.contains(&AccessEvent::ConnectionLost {
        sorc_id: sorc_id(),
        error: ConnectionLostError::PhysicalConnectionLost
    }));
}

#[test]
fn silent_sorc_times_out_after_heartbeat_timeout() {
    let mut h = Harness::connected(sorc().ignoring_heartbeats());
    let (seen, f) = recorder();
    h.manager.connection_change().subscribe(f);

    h.run_for(5);
    assert!(h.manager.connection_state().is_connected());
    h.run_for(1);

    assert_eq!(h.manager.connection_state(), SecureConnectionState::Disconnected);
    assert_eq!(
        seen.borrow().last().map(|c| c.action),
        Some(ConnectionAction::ConnectionLost {
            error: ConnectionLostError::HeartbeatTimedOut
        })
    );
}

#[test]
fn answering_sorc_stays_connected() {
    let mut h = Harness::connected(sorc());
    h.run_for(30);
    assert!(h.manager.connection_state().is_connected());
}

#[test]
fn reconnect_after_disconnect_runs_a_fresh_handshake() {
    let mut h = Harness::connected(sorc());
    h.manager.disconnect();
    h.manager.handle_advertisement(sorc_id().as_bytes(), -50);

    h.connect(1);

    assert!(h.manager.connection_state().is_connected());
    let challenges = h
        .sorc()
        .received_ids()
        .into_iter()
        .filter(|id| *id == SorcMessageId::ChallengePhone)
        .count();
    assert_eq!(challenges, 2);
}
