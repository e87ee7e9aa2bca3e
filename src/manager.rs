//! [`SorcManager`]: the single entry point applications use.
//!
//! ```text
//!   app ──connect / request_service_grant / discovery──▶ ┌────────────┐
//!                                                        │ SorcManager │──▶ Transport port
//!   radio ──handle_*──────────────────────────────────▶ │  discovery  │
//!   main loop ──tick──────────────────────────────────▶ │  session    │──▶ EventSink
//!                                                        └────────────┘
//!   streams: discovery · connection · service grant · bluetooth
//! ```
//!
//! Owns the whole layer stack plus the clock and telemetry sink.  Every
//! method runs to completion on the caller's thread.

use log::{debug, info, warn};

use crate::change::{ChangeSubject, ValueSubject};
use crate::config::AccessConfig;
use crate::connection::{ConnectionAction, SecureConnectionState};
use crate::discovery::{
    DiscoveryAction, DiscoveryManager, DiscoveryState, sorc_id_from_manufacturer_data,
};
use crate::error::{ConfigError, TransportError};
use crate::lease::{LeaseToken, LeaseTokenBlob, SorcId};
use crate::ports::{Clock, EventSink, PhysicalEvent, Transport};
use crate::protocol::message::ServiceGrantId;
use crate::security::SecurityManager;
use crate::session::{ServiceGrantAction, ServiceGrantState, SessionManager};
use crate::transport::TransportManager;

pub struct SorcManager<T: Transport, C: Clock, S: EventSink> {
    session: SessionManager<T>,
    discovery: DiscoveryManager,
    bluetooth: ValueSubject<bool>,
    clock: C,
    sink: S,
    config: AccessConfig,
}

impl<T: Transport, C: Clock, S: EventSink> SorcManager<T, C, S> {
    /// Build the stack over `port`.  Bluetooth is assumed off until the
    /// radio reports otherwise.
    pub fn new(port: T, clock: C, sink: S, config: AccessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = TransportManager::new(port, usize::from(config.default_mtu));
        let session = SessionManager::new(SecurityManager::new(transport), &config);
        Ok(Self {
            session,
            discovery: DiscoveryManager::new(&config),
            bluetooth: ValueSubject::new(false),
            clock,
            sink,
            config,
        })
    }

    // ── Streams ──────────────────────────────────────────────

    pub fn discovery_change(&mut self) -> &mut ChangeSubject<DiscoveryState, DiscoveryAction> {
        self.discovery.discovery_change()
    }

    pub fn connection_change(
        &mut self,
    ) -> &mut ChangeSubject<SecureConnectionState, ConnectionAction> {
        self.session.connection_change()
    }

    pub fn service_grant_change(
        &mut self,
    ) -> &mut ChangeSubject<ServiceGrantState, ServiceGrantAction> {
        self.session.service_grant_change()
    }

    pub fn bluetooth_status(&mut self) -> &mut ValueSubject<bool> {
        &mut self.bluetooth
    }

    pub fn is_bluetooth_enabled(&self) -> bool {
        *self.bluetooth.value()
    }

    pub fn connection_state(&self) -> SecureConnectionState {
        self.session.state()
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn port(&self) -> &T {
        self.session.security().transport().port()
    }

    pub fn port_mut(&mut self) -> &mut T {
        self.session.security_mut().transport_mut().port_mut()
    }

    // ── Discovery ────────────────────────────────────────────

    pub fn start_discovery(&mut self) {
        let now = self.clock.now();
        self.discovery.start_discovery(now);
        if self.is_bluetooth_enabled() {
            self.port_mut().set_scanning(true);
        } else {
            debug!("manager: discovery enabled, waiting for bluetooth");
        }
    }

    pub fn stop_discovery(&mut self) {
        self.port_mut().set_scanning(false);
        self.discovery.stop_discovery();
    }

    // ── Connection ───────────────────────────────────────────

    pub fn connect_to_sorc(&mut self, token: LeaseToken, blob: LeaseTokenBlob) {
        let sorc_id = token.sorc_id();
        if !self.discovery.state().contains(&sorc_id) {
            warn!("manager: connecting to undiscovered SORC {}", sorc_id);
        }
        let now = self.clock.now();
        let before = self.session.state();
        self.session.connect(token, blob, now, &mut self.sink);
        self.forget_if_ended(before, false);
    }

    pub fn disconnect(&mut self) {
        let now = self.clock.now();
        let before = self.session.state();
        self.session.disconnect(now, &mut self.sink);
        self.forget_if_ended(before, true);
    }

    /// Queue a service grant on the current session.  Returns whether it
    /// was accepted.
    pub fn request_service_grant(&mut self, id: ServiceGrantId) -> bool {
        let now = self.clock.now();
        self.session.request_service_grant(id, now, &mut self.sink)
    }

    // ── Radio input ──────────────────────────────────────────

    /// The radio's power state changed.
    pub fn handle_bluetooth_state(&mut self, powered_on: bool) {
        info!("manager: bluetooth {}", if powered_on { "on" } else { "off" });
        self.bluetooth.set(powered_on);
        if powered_on {
            if self.discovery.state().discovery_enabled {
                self.port_mut().set_scanning(true);
            }
        } else {
            self.discovery.reset();
        }
    }

    /// An advertisement with manufacturer data arrived.
    pub fn handle_advertisement(&mut self, manufacturer_data: &[u8], rssi: i16) {
        match sorc_id_from_manufacturer_data(manufacturer_data) {
            Some(sorc_id) => self.handle_sorc_discovered(sorc_id, rssi),
            None => debug!(
                "manager: ignoring advertisement with {} bytes of manufacturer data",
                manufacturer_data.len()
            ),
        }
    }

    pub fn handle_sorc_discovered(&mut self, sorc_id: SorcId, rssi: i16) {
        let now = self.clock.now();
        self.discovery.sorc_discovered(sorc_id, rssi, now);
    }

    pub fn handle_physical_event(&mut self, event: PhysicalEvent) {
        let now = self.clock.now();
        let before = self.session.state();
        self.session.handle_physical_event(event, now, &mut self.sink);
        self.forget_if_ended(before, false);
    }

    pub fn handle_frame_sent(&mut self, result: Result<(), TransportError>) {
        let now = self.clock.now();
        let before = self.session.state();
        self.session.handle_frame_sent(result, now, &mut self.sink);
        self.forget_if_ended(before, false);
    }

    pub fn handle_frame_received(&mut self, result: Result<Vec<u8>, TransportError>) {
        let now = self.clock.now();
        let before = self.session.state();
        self.session.handle_frame_received(result, now, &mut self.sink);
        self.forget_if_ended(before, false);
    }

    /// Drive timers; call periodically from the owner's loop.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let before = self.session.state();
        self.session.tick(now, &mut self.sink);
        self.forget_if_ended(before, false);
        self.discovery.tick(now, self.session.state().sorc_id());
    }

    /// A SORC whose connection just ended is dropped from discovery.
    fn forget_if_ended(&mut self, before: SecureConnectionState, requested: bool) {
        if let Some(sorc_id) = before.sorc_id() {
            if self.session.state().is_disconnected() {
                self.discovery.remove(sorc_id, requested);
            }
        }
    }
}
