//! Discovery and bluetooth status through the facade.

use std::time::Duration;

use crate::mock_radio::{Harness, recorder, sorc, sorc_id};

use secure_access::discovery::DiscoveryAction;
use uuid::Uuid;

#[test]
fn scanning_waits_for_bluetooth() {
    let mut h = Harness::new(sorc());
    h.manager.start_discovery();
    assert!(!h.manager.port().is_scanning());

    h.manager.handle_bluetooth_state(true);
    assert!(h.manager.port().is_scanning());

    h.manager.stop_discovery();
    assert!(!h.manager.port().is_scanning());
}

#[test]
fn bluetooth_status_replays_and_notifies() {
    let mut h = Harness::new(sorc());
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    h.manager
        .bluetooth_status()
        .subscribe(move |on| sink.borrow_mut().push(*on));

    h.manager.handle_bluetooth_state(true);
    h.manager.handle_bluetooth_state(true);
    h.manager.handle_bluetooth_state(false);

    assert_eq!(*seen.borrow(), vec![false, true, false]);
}

#[test]
fn advertisements_become_discovered_sorcs() {
    let mut h = Harness::discovered(sorc());
    let (seen, f) = recorder();
    h.manager.discovery_change().subscribe(f);

    h.manager.handle_advertisement(sorc_id().as_bytes(), -70);
    h.manager.handle_advertisement(&[1, 2, 3], -70);

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[1].action,
        DiscoveryAction::Rediscovered { sorc_id: sorc_id() }
    );
    assert_eq!(seen[1].state.discovered_sorcs[&sorc_id()].rssi, -70);
}

#[test]
fn unseen_sorcs_are_lost_but_the_connected_one_stays() {
    let mut h = Harness::connected(sorc());
    let other = Uuid::from_u128(0x0123);
    h.manager.handle_sorc_discovered(other, -80);

    h.run_for(8);

    let state = h.manager.discovery_change().state().clone();
    assert!(state.contains(&sorc_id()));
    assert!(!state.contains(&other));
}

#[test]
fn bluetooth_off_forgets_everything() {
    let mut h = Harness::discovered(sorc());
    h.clock.advance(Duration::from_millis(100));
    h.manager.handle_bluetooth_state(false);

    let change = h.manager.discovery_change().current();
    assert!(change.state.discovered_sorcs.is_empty());
    assert!(change.state.discovery_enabled);
}
