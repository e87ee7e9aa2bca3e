//! Transport connection state machine.
//!
//! ```text
//!   Disconnected
//!     │ connect(id)
//!     ▼
//!   Connecting(id, Physical) ──radio: connected──▶ Connecting(id, RequestingMtu)
//!                                                    │ MTU response
//!                                                    ▼
//!                                                  Connected(id)
//! ```
//!
//! Owns the radio port and the [`DataCommunicator`].  Inputs come from
//! the layer above (`connect`, `disconnect`, `send_data`) and from the
//! radio (`handle_*`); each returns the [`TransportEvent`]s the layer
//! above must react to.  The same transitions are published on the
//! layer's own change stream for observers.

use log::{debug, info, warn};

use super::communicator::{DataCommunicator, SendProgress};
use crate::change::{Change, ChangeAction, ChangeSubject};
use crate::connection::{
    ConnectingFailedError, ConnectionLostError, ConnectionState, DisconnectCause,
    DisconnectOutcome, LinkFailure, ProtocolFailure,
};
use crate::error::TransportError;
use crate::lease::SorcId;
use crate::ports::{PhysicalEvent, Transport};
use crate::protocol::frame::HEADER_SIZE;
use crate::protocol::message::{SorcMessage, SorcMessageId, parse_mtu};

// ── State / action ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConnectingState {
    Physical,
    RequestingMtu,
}

pub type TransportState = ConnectionState<TransportConnectingState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Initial,
    Connect { sorc_id: SorcId },
    PhysicalConnectionEstablished { sorc_id: SorcId },
    ConnectionEstablished { sorc_id: SorcId },
    ConnectingFailed { sorc_id: SorcId, error: ConnectingFailedError },
    Disconnect,
    ConnectionLost { error: ConnectionLostError },
}

impl ChangeAction for TransportAction {
    fn initial() -> Self {
        Self::Initial
    }
}

pub type TransportChange = Change<TransportState, TransportAction>;

/// Reports handed to the layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionChanged(TransportChange),
    DataSent(Result<Vec<u8>, TransportError>),
    DataReceived(Result<Vec<u8>, TransportError>),
}

// ── Manager ──────────────────────────────────────────────────

pub struct TransportManager<T: Transport> {
    port: T,
    communicator: DataCommunicator,
    connection: ChangeSubject<TransportState, TransportAction>,
}

impl<T: Transport> TransportManager<T> {
    pub fn new(port: T, default_mtu: usize) -> Self {
        Self {
            port,
            communicator: DataCommunicator::new(default_mtu),
            connection: ChangeSubject::new(TransportState::Disconnected),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.connection.state()
    }

    pub fn connection_change(&mut self) -> &mut ChangeSubject<TransportState, TransportAction> {
        &mut self.connection
    }

    pub fn mtu(&self) -> usize {
        self.communicator.mtu()
    }

    pub fn port(&self) -> &T {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    // ── Commands from above ──────────────────────────────────

    /// Accepted from `Disconnected`, or as a retry while still waiting
    /// for the link to the same SORC.
    pub fn connect(&mut self, sorc_id: SorcId) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        match self.state() {
            TransportState::Disconnected => {
                self.publish(
                    TransportState::Connecting {
                        sorc_id,
                        state: TransportConnectingState::Physical,
                    },
                    TransportAction::Connect { sorc_id },
                    &mut events,
                );
            }
            state if state.is_connecting_in(sorc_id, TransportConnectingState::Physical) => {}
            state => {
                debug!("transport: ignoring connect to {} while {}", sorc_id, state);
                return events;
            }
        }
        info!("transport: connecting to {}", sorc_id);
        self.port.connect(sorc_id);
        events
    }

    pub fn disconnect(&mut self) -> Vec<TransportEvent> {
        self.disconnect_with(DisconnectCause::UserRequested)
    }

    /// Send one whole message; completion arrives as `DataSent`.
    pub fn send_data(&mut self, data: &[u8]) -> Vec<TransportEvent> {
        if !self.state().is_connected() {
            return vec![TransportEvent::DataSent(Err(TransportError::NotConnected))];
        }
        match self.write_message(data) {
            Ok(()) => Vec::new(),
            Err(e) => vec![TransportEvent::DataSent(Err(e))],
        }
    }

    // ── Radio input ──────────────────────────────────────────

    pub fn handle_physical_event(&mut self, event: PhysicalEvent) -> Vec<TransportEvent> {
        let state = self.state();
        if state.sorc_id() != Some(event.sorc_id()) {
            debug!("transport: dropping stale {:?}", event);
            return Vec::new();
        }

        match event {
            PhysicalEvent::Connected(sorc_id) => {
                if !state.is_connecting_in(sorc_id, TransportConnectingState::Physical) {
                    return Vec::new();
                }
                let mut events = Vec::new();
                self.publish(
                    TransportState::Connecting {
                        sorc_id,
                        state: TransportConnectingState::RequestingMtu,
                    },
                    TransportAction::PhysicalConnectionEstablished { sorc_id },
                    &mut events,
                );
                self.request_mtu(&mut events);
                events
            }
            PhysicalEvent::ConnectingFailed(_)
            | PhysicalEvent::Disconnected(_)
            | PhysicalEvent::ConnectionLost(_) => {
                let link = if state.is_connected() {
                    LinkFailure::ConnectionLost
                } else {
                    LinkFailure::ConnectingFailed
                };
                let mut events = Vec::new();
                self.finish_disconnect(DisconnectCause::Transport(link), &mut events);
                events
            }
        }
    }

    /// The radio finished (or failed) the last frame write.
    pub fn handle_frame_sent(&mut self, result: Result<(), TransportError>) -> Vec<TransportEvent> {
        if let Err(e) = result {
            if !self.communicator.reset_sending() {
                return Vec::new();
            }
            return self.send_error(e);
        }

        match self.communicator.frame_sent() {
            SendProgress::Idle => Vec::new(),
            SendProgress::Next(bytes) => match self.write_frame(&bytes) {
                Ok(()) => Vec::new(),
                Err(e) => {
                    self.communicator.reset_sending();
                    self.send_error(e)
                }
            },
            SendProgress::Complete(message) => {
                if self.is_requesting_mtu() {
                    return Vec::new();
                }
                vec![TransportEvent::DataSent(Ok(message))]
            }
        }
    }

    /// A notification arrived (or the radio failed to read one).
    pub fn handle_frame_received(
        &mut self,
        result: Result<Vec<u8>, TransportError>,
    ) -> Vec<TransportEvent> {
        let requesting_mtu = self.is_requesting_mtu();
        if !requesting_mtu && !self.state().is_connected() {
            return Vec::new();
        }

        let message = result.and_then(|raw| self.communicator.frame_received(&raw));
        match message {
            Ok(None) => Vec::new(),
            Ok(Some(message)) if requesting_mtu => self.handle_mtu_response(&message),
            Ok(Some(message)) => vec![TransportEvent::DataReceived(Ok(message))],
            Err(e) => {
                self.communicator.reset_receiving();
                if requesting_mtu {
                    warn!("transport: receive failed during MTU negotiation: {}", e);
                    let mut events = Vec::new();
                    self.disconnect_with_into(
                        DisconnectCause::ProtocolFailure(ProtocolFailure::InvalidMtuResponse),
                        &mut events,
                    );
                    return events;
                }
                vec![TransportEvent::DataReceived(Err(e))]
            }
        }
    }

    // ── Internals ────────────────────────────────────────────

    fn is_requesting_mtu(&self) -> bool {
        matches!(
            self.state(),
            TransportState::Connecting {
                state: TransportConnectingState::RequestingMtu,
                ..
            }
        )
    }

    fn request_mtu(&mut self, events: &mut Vec<TransportEvent>) {
        debug!("transport: requesting MTU");
        let request = SorcMessage::empty(SorcMessageId::MtuRequest).to_bytes();
        if let Err(e) = self.write_message(&request) {
            warn!("transport: MTU request failed: {}", e);
            self.disconnect_with_into(
                DisconnectCause::ProtocolFailure(ProtocolFailure::InvalidMtuResponse),
                events,
            );
        }
    }

    fn handle_mtu_response(&mut self, raw: &[u8]) -> Vec<TransportEvent> {
        let message = SorcMessage::from_bytes(raw);
        if message.id != SorcMessageId::MtuReceive {
            debug!("transport: dropping {:?} before MTU negotiation", message.id);
            return Vec::new();
        }

        let mut events = Vec::new();
        match parse_mtu(&message.payload) {
            Some(mtu) if mtu > HEADER_SIZE => {
                let Some(sorc_id) = self.state().sorc_id() else {
                    return events;
                };
                info!("transport: MTU {} negotiated with {}", mtu, sorc_id);
                // The reply can beat the request's write confirmation.
                if self.communicator.reset_sending() {
                    debug!("transport: MTU reply arrived before the request was confirmed");
                }
                self.communicator.set_mtu(mtu);
                self.publish(
                    TransportState::Connected { sorc_id },
                    TransportAction::ConnectionEstablished { sorc_id },
                    &mut events,
                );
            }
            other => {
                warn!("transport: unusable MTU response {:?}", other);
                self.disconnect_with_into(
                    DisconnectCause::ProtocolFailure(ProtocolFailure::InvalidMtuResponse),
                    &mut events,
                );
            }
        }
        events
    }

    fn send_error(&mut self, error: TransportError) -> Vec<TransportEvent> {
        if self.is_requesting_mtu() {
            let mut events = Vec::new();
            self.disconnect_with_into(
                DisconnectCause::ProtocolFailure(ProtocolFailure::InvalidMtuResponse),
                &mut events,
            );
            return events;
        }
        vec![TransportEvent::DataSent(Err(error))]
    }

    fn write_message(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let first = self.communicator.begin_send(data)?;
        if let Err(e) = self.write_frame(&first) {
            self.communicator.reset_sending();
            return Err(e);
        }
        Ok(())
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write(bytes).map_err(|e| {
            warn!("transport: write rejected: {:?}", e);
            TransportError::WriteFailed
        })
    }

    /// Tear down because of `cause`; the layers above call this too.
    pub fn disconnect_with(&mut self, cause: DisconnectCause) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        self.disconnect_with_into(cause, &mut events);
        events
    }

    fn disconnect_with_into(&mut self, cause: DisconnectCause, events: &mut Vec<TransportEvent>) {
        if self.state().is_disconnected() {
            return;
        }
        self.port.disconnect();
        self.finish_disconnect(cause, events);
    }

    fn finish_disconnect(&mut self, cause: DisconnectCause, events: &mut Vec<TransportEvent>) {
        let Some(sorc_id) = self.state().sorc_id() else {
            return;
        };
        self.communicator.reset();
        let action = match cause.outcome() {
            DisconnectOutcome::Disconnect => TransportAction::Disconnect,
            DisconnectOutcome::ConnectingFailed(error) => {
                TransportAction::ConnectingFailed { sorc_id, error }
            }
            DisconnectOutcome::ConnectionLost(error) => TransportAction::ConnectionLost { error },
        };
        info!("transport: disconnected from {} ({})", sorc_id, cause);
        self.publish(TransportState::Disconnected, action, events);
    }

    fn publish(
        &mut self,
        state: TransportState,
        action: TransportAction,
        events: &mut Vec<TransportEvent>,
    ) {
        self.connection.publish(state, action);
        events.push(TransportEvent::ConnectionChanged(Change::new(state, action)));
    }
}
