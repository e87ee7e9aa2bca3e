//! Test harness: a `SorcManager` wired to a simulated SORC, a manual
//! clock and a recording telemetry sink.
//!
//! `pump` plays the radio: it hands each parked write to the SORC,
//! confirms the write, then delivers whatever the SORC notified back.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use secure_access::adapters::ManualClock;
use secure_access::change::Change;
use secure_access::events::AccessEvent;
use secure_access::ports::{EventSink, PhysicalEvent};
use secure_access::sim::{SimulatedLink, SimulatedSorc};
use secure_access::{AccessConfig, LeaseToken, LeaseTokenBlob, SorcId, SorcManager};

pub const SORC_ID: &str = "be2fecaf-734b-4252-8312-59d477200a20";

pub const LEASE_TOKEN_JSON: &str = r#"{
    "leaseTokenId": "6d4a5b2e-3c1f-4e8a-9b7d-2f1e0c9a8b71",
    "leaseId": "1c2d3e4f-5a6b-4c7d-8e9f-0a1b2c3d4e5f",
    "userId": "3f1a0b2c-4d5e-4f60-8a9b-0c1d2e3f4a5b",
    "sorcId": "be2fecaf-734b-4252-8312-59d477200a20",
    "serviceGrantList": [{"serviceGrantId": "1"}, {"serviceGrantId": "2"}],
    "leaseTokenDocumentVersion": "1",
    "sorcAccessKey": "A9BA14A150209FE230E71A2B780F0645",
    "startTime": "2026-01-01T00:00:00.000Z",
    "endTime": "2027-01-01T00:00:00.000Z"
}"#;

pub fn blob_json(counter: u32) -> String {
    format!(
        r#"{{"sorcId": "{SORC_ID}", "blob": "AQIDBAUGBwg=", "blobMessageCounter": "{counter}"}}"#
    )
}

pub fn sorc_id() -> SorcId {
    SorcId::parse_str(SORC_ID).unwrap()
}

pub fn token() -> LeaseToken {
    LeaseToken::from_json(LEASE_TOKEN_JSON).unwrap()
}

pub fn blob(counter: u32) -> LeaseTokenBlob {
    LeaseTokenBlob::from_json(&blob_json(counter)).unwrap()
}

pub fn sorc() -> SimulatedSorc {
    SimulatedSorc::for_token(&token()).unwrap()
}

// ── RecordingSink ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AccessEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&AccessEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AccessEvent) {
        self.events.push(event.clone());
    }
}

// ── Harness ──────────────────────────────────────────────────

pub type Manager = SorcManager<SimulatedLink, Rc<ManualClock>, RecordingSink>;

pub struct Harness {
    pub manager: Manager,
    pub clock: Rc<ManualClock>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(sorc: SimulatedSorc) -> Self {
        Self::with_config(sorc, AccessConfig::default())
    }

    pub fn with_config(sorc: SimulatedSorc, config: AccessConfig) -> Self {
        let clock = Rc::new(ManualClock::new());
        let manager = SorcManager::new(
            SimulatedLink::new(sorc),
            clock.clone(),
            RecordingSink::default(),
            config,
        )
        .unwrap();
        Self { manager, clock }
    }

    /// Bluetooth on, discovery on and the SORC advertising.
    pub fn discovered(sorc: SimulatedSorc) -> Self {
        let mut h = Self::new(sorc);
        h.manager.handle_bluetooth_state(true);
        h.manager.start_discovery();
        h.manager.handle_advertisement(sorc_id().as_bytes(), -55);
        h
    }

    /// Discovered, then connected with a fresh blob.
    pub fn connected(sorc: SimulatedSorc) -> Self {
        let mut h = Self::discovered(sorc);
        h.connect(1);
        assert!(h.manager.connection_state().is_connected());
        h
    }

    pub fn connect(&mut self, blob_counter: u32) {
        self.manager.connect_to_sorc(token(), blob(blob_counter));
        self.manager
            .handle_physical_event(PhysicalEvent::Connected(sorc_id()));
        self.pump();
    }

    pub fn pump(&mut self) {
        while let Some(frame) = self.manager.port_mut().take_write() {
            let replies = self.manager.port_mut().sorc.receive_frame(&frame);
            self.manager.handle_frame_sent(Ok(()));
            for reply in replies {
                self.manager.handle_frame_received(Ok(reply));
            }
        }
    }

    pub fn deliver(&mut self, frames: Vec<Vec<u8>>) {
        for frame in frames {
            self.manager.handle_frame_received(Ok(frame));
        }
    }

    /// Advance the clock second by second, ticking and pumping.
    pub fn run_for(&mut self, secs: u64) {
        for _ in 0..secs {
            self.clock.advance(Duration::from_secs(1));
            self.manager.tick();
            self.pump();
        }
    }

    pub fn sorc(&mut self) -> &mut SimulatedSorc {
        &mut self.manager.port_mut().sorc
    }

    pub fn sink(&self) -> &RecordingSink {
        self.manager.sink()
    }
}

/// Collect every change published on a stream from now on, replay first.
pub fn recorder<S: 'static, A: 'static>() -> (
    Rc<RefCell<Vec<Change<S, A>>>>,
    impl FnMut(&Change<S, A>) + 'static,
)
where
    S: Clone,
    A: Clone,
{
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |change: &Change<S, A>| {
        sink.borrow_mut().push(change.clone())
    })
}
