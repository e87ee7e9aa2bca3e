//! Security layer: runs the handshake over a fresh transport connection
//! and then protects every message with the session key.
//!
//! ```text
//!   Disconnected
//!     │ connect(token, blob)
//!     ▼
//!   Connecting(Physical) ──transport: requesting MTU──▶ Connecting(Transport)
//!                                                          │ transport connected
//!                                                          ▼
//!   Connected ◀──b3 written, key installed── Connecting(Challenging)
//! ```
//!
//! While challenging, messages travel in clear and only handshake and
//! blob messages are acted on.  Once connected, every message is sealed
//! with [`CipherState`].

use log::{debug, info, warn};

use super::challenge::{ChallengeStep, Challenger, SessionKey};
use super::crypto::{CipherState, Direction, EncryptionContext};
use crate::change::{Change, ChangeSubject};
use crate::connection::{
    ConnectingState, ConnectionAction, ConnectionChange, DisconnectCause, ProtocolFailure,
    SecureConnectionState,
};
use crate::error::{ChallengeError, SecureError, TransportError};
use crate::lease::{LeaseToken, LeaseTokenBlob, SorcId};
use crate::ports::{PhysicalEvent, Transport};
use crate::protocol::message::{SorcMessage, SorcMessageId, lt_blob_payload, parse_blob_request};
use crate::transport::{
    TransportAction, TransportChange, TransportConnectingState, TransportEvent, TransportManager,
    TransportState,
};

/// Reports handed to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecureEvent {
    ConnectionChanged(ConnectionChange),
    MessageSent(Result<SorcMessage, SecureError>),
    MessageReceived(Result<SorcMessage, SecureError>),
}

struct Credentials {
    token: LeaseToken,
    blob: LeaseTokenBlob,
}

pub struct SecurityManager<T: Transport> {
    transport: TransportManager<T>,
    connection: ChangeSubject<SecureConnectionState, ConnectionAction>,
    credentials: Option<Credentials>,
    challenger: Option<Challenger>,
    cipher: CipherState,
    /// Key derived from the handshake, installed once `b3` is written.
    pending_key: Option<SessionKey>,
    /// Plaintext of the message the transport is sending.
    in_flight: Option<SorcMessage>,
    /// Why the handshake was rejected, reported even if the rejection
    /// message itself cannot be sent.
    rejection: Option<ChallengeError>,
}

impl<T: Transport> SecurityManager<T> {
    pub fn new(transport: TransportManager<T>) -> Self {
        Self {
            transport,
            connection: ChangeSubject::new(SecureConnectionState::Disconnected),
            credentials: None,
            challenger: None,
            cipher: CipherState::Unauthenticated,
            pending_key: None,
            in_flight: None,
            rejection: None,
        }
    }

    pub fn state(&self) -> SecureConnectionState {
        *self.connection.state()
    }

    pub fn connection_change(
        &mut self,
    ) -> &mut ChangeSubject<SecureConnectionState, ConnectionAction> {
        &mut self.connection
    }

    pub fn transport(&self) -> &TransportManager<T> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportManager<T> {
        &mut self.transport
    }

    // ── Commands from above ──────────────────────────────────

    pub fn connect(&mut self, token: LeaseToken, blob: LeaseTokenBlob) -> Vec<SecureEvent> {
        let sorc_id = token.sorc_id();
        let state = self.state();
        let mut events = Vec::new();

        if !state.is_disconnected() && !state.is_connecting_in(sorc_id, ConnectingState::Physical) {
            debug!("security: ignoring connect to {} while {}", sorc_id, state);
            return events;
        }

        self.credentials = Some(Credentials { token, blob });
        if state.is_disconnected() {
            self.publish(
                SecureConnectionState::Connecting {
                    sorc_id,
                    state: ConnectingState::Physical,
                },
                ConnectionAction::Connect { sorc_id },
                &mut events,
            );
        }
        let lower = self.transport.connect(sorc_id);
        self.process(lower, &mut events);
        events
    }

    pub fn disconnect(&mut self) -> Vec<SecureEvent> {
        self.disconnect_with(DisconnectCause::UserRequested)
    }

    /// Tear down for `cause`, reporting that cause regardless of what the
    /// transport says while going down.
    pub fn disconnect_with(&mut self, cause: DisconnectCause) -> Vec<SecureEvent> {
        let mut events = Vec::new();
        self.disconnect_into(cause, &mut events);
        events
    }

    /// Seal and send one message; only valid while connected.
    pub fn send_message(&mut self, message: SorcMessage) -> Vec<SecureEvent> {
        if !self.state().is_connected() {
            return vec![SecureEvent::MessageSent(Err(SecureError::Transport(
                TransportError::NotConnected,
            )))];
        }
        let mut events = Vec::new();
        self.send_internal(message, &mut events);
        events
    }

    // ── Radio input ──────────────────────────────────────────

    pub fn handle_physical_event(&mut self, event: PhysicalEvent) -> Vec<SecureEvent> {
        let lower = self.transport.handle_physical_event(event);
        self.collect(lower)
    }

    pub fn handle_frame_sent(&mut self, result: Result<(), TransportError>) -> Vec<SecureEvent> {
        let lower = self.transport.handle_frame_sent(result);
        self.collect(lower)
    }

    pub fn handle_frame_received(
        &mut self,
        result: Result<Vec<u8>, TransportError>,
    ) -> Vec<SecureEvent> {
        let lower = self.transport.handle_frame_received(result);
        self.collect(lower)
    }

    // ── Transport reports ────────────────────────────────────

    fn collect(&mut self, lower: Vec<TransportEvent>) -> Vec<SecureEvent> {
        let mut events = Vec::new();
        self.process(lower, &mut events);
        events
    }

    fn process(&mut self, lower: Vec<TransportEvent>, events: &mut Vec<SecureEvent>) {
        for event in lower {
            match event {
                TransportEvent::ConnectionChanged(change) => {
                    self.handle_transport_change(change, events);
                }
                TransportEvent::DataSent(result) => self.handle_data_sent(result, events),
                TransportEvent::DataReceived(result) => self.handle_data_received(result, events),
            }
        }
    }

    fn handle_transport_change(&mut self, change: TransportChange, events: &mut Vec<SecureEvent>) {
        match change.state {
            TransportState::Connecting {
                sorc_id,
                state: TransportConnectingState::RequestingMtu,
            } => {
                if self.state().is_connecting_in(sorc_id, ConnectingState::Physical) {
                    self.publish(
                        SecureConnectionState::Connecting {
                            sorc_id,
                            state: ConnectingState::Transport,
                        },
                        ConnectionAction::PhysicalConnectionEstablished { sorc_id },
                        events,
                    );
                }
            }
            TransportState::Connecting { .. } => {}
            TransportState::Connected { sorc_id } => {
                if self.state().is_connecting_in(sorc_id, ConnectingState::Transport) {
                    self.establish_crypto(sorc_id, events);
                }
            }
            TransportState::Disconnected => {
                let cause = match change.action {
                    TransportAction::ConnectingFailed { error, .. } => {
                        DisconnectCause::from_connecting_failed(error)
                    }
                    TransportAction::ConnectionLost { error } => {
                        DisconnectCause::from_connection_lost(error)
                    }
                    _ => DisconnectCause::UserRequested,
                };
                self.finish_disconnect(cause, events);
            }
        }
    }

    fn handle_data_sent(
        &mut self,
        result: Result<Vec<u8>, TransportError>,
        events: &mut Vec<SecureEvent>,
    ) {
        // A rejected busy send leaves the package on the wire untouched.
        if matches!(&result, Err(e) if *e != TransportError::SendingInProgress) {
            self.in_flight = None;
        }

        match self.state() {
            SecureConnectionState::Connecting {
                state: ConnectingState::Challenging,
                ..
            } => match result {
                Err(e) => {
                    warn!("security: handshake send failed: {}", e);
                    self.fail_challenge(self.rejection, events);
                }
                Ok(_) => {
                    self.in_flight = None;
                    if let Some(key) = self.pending_key.take() {
                        self.enable_encryption(&key, events);
                    }
                }
            },
            SecureConnectionState::Connected { .. } => match result {
                Ok(_) => {
                    if let Some(message) = self.in_flight.take() {
                        events.push(SecureEvent::MessageSent(Ok(message)));
                    }
                }
                Err(e) => events.push(SecureEvent::MessageSent(Err(e.into()))),
            },
            _ => {}
        }
    }

    fn handle_data_received(
        &mut self,
        result: Result<Vec<u8>, TransportError>,
        events: &mut Vec<SecureEvent>,
    ) {
        match self.state() {
            SecureConnectionState::Connecting {
                state: ConnectingState::Challenging,
                ..
            } => match result {
                Ok(data) => self.handle_challenge_message(&SorcMessage::from_bytes(&data), events),
                Err(e) => {
                    warn!("security: receive failed while challenging: {}", e);
                    self.fail_challenge(None, events);
                }
            },
            SecureConnectionState::Connected { .. } => {
                let received = match result {
                    Ok(data) => {
                        let message = self.cipher.decrypt_message(&data);
                        if message.is_valid() {
                            Ok(message)
                        } else {
                            Err(SecureError::DecryptionFailed)
                        }
                    }
                    Err(e) => Err(e.into()),
                };
                events.push(SecureEvent::MessageReceived(received));
            }
            _ => {}
        }
    }

    // ── Handshake ────────────────────────────────────────────

    fn establish_crypto(&mut self, sorc_id: SorcId, events: &mut Vec<SecureEvent>) {
        let challenger = match &self.credentials {
            Some(credentials) => Challenger::new(&credentials.token),
            None => {
                warn!("security: no lease token for {}", sorc_id);
                self.fail_challenge(Some(ChallengeError::AesCryptoNotInitialised), events);
                return;
            }
        };
        let mut challenger = match challenger {
            Ok(challenger) => challenger,
            Err(e) => {
                warn!("security: cannot start handshake: {}", e);
                self.fail_challenge(Some(e), events);
                return;
            }
        };

        self.publish(
            SecureConnectionState::Connecting {
                sorc_id,
                state: ConnectingState::Challenging,
            },
            ConnectionAction::TransportConnectionEstablished { sorc_id },
            events,
        );
        let opening = challenger.begin();
        self.challenger = Some(challenger);
        self.send_internal(opening, events);
    }

    fn handle_challenge_message(&mut self, message: &SorcMessage, events: &mut Vec<SecureEvent>) {
        match message.id {
            SorcMessageId::ChallengeSorcResponse
            | SorcMessageId::BadChallengeSorcResponse
            | SorcMessageId::LtAck => {
                let step = match self.challenger.as_mut() {
                    Some(challenger) => challenger.handle(message),
                    None => {
                        self.fail_challenge(Some(ChallengeError::NoChallengeMessage), events);
                        return;
                    }
                };
                match step {
                    Ok(ChallengeStep::Send(next)) => self.send_internal(next, events),
                    Ok(ChallengeStep::Finished {
                        response,
                        session_key,
                    }) => {
                        self.pending_key = Some(session_key);
                        self.send_internal(response, events);
                    }
                    Ok(ChallengeStep::NeedsBlob { latest_counter }) => {
                        self.handle_blob_needed(latest_counter, events);
                    }
                    Ok(ChallengeStep::Rejected { response, error }) => {
                        warn!("security: handshake rejected: {}", error);
                        self.rejection = Some(error);
                        self.send_internal(response, events);
                        self.fail_challenge(Some(error), events);
                    }
                    Err(e) => {
                        warn!("security: handshake aborted: {}", e);
                        self.fail_challenge(Some(e), events);
                    }
                }
            }
            SorcMessageId::LtBlobRequest => {
                let sorc_counter = parse_blob_request(&message.payload);
                let ours = self.blob_counter();
                debug!("security: SORC holds blob {}, we hold {:?}", sorc_counter, ours);
                if ours.is_some_and(|ours| ours > sorc_counter) {
                    self.send_blob(events);
                }
            }
            other => debug!("security: ignoring {:?} while challenging", other),
        }
    }

    fn handle_blob_needed(&mut self, latest_counter: Option<u32>, events: &mut Vec<SecureEvent>) {
        let ours = self.blob_counter().unwrap_or(0);
        if latest_counter.is_some_and(|latest| ours < latest) {
            warn!(
                "security: blob {} is older than SORC's {:?}",
                ours, latest_counter
            );
            self.disconnect_into(
                DisconnectCause::ProtocolFailure(ProtocolFailure::BlobOutdated),
                events,
            );
            return;
        }
        self.send_blob(events);
    }

    fn send_blob(&mut self, events: &mut Vec<SecureEvent>) {
        let payload = match &self.credentials {
            Some(credentials) => lt_blob_payload(&credentials.blob.data),
            None => {
                self.fail_challenge(None, events);
                return;
            }
        };
        match payload {
            Ok(payload) => {
                info!("security: sending lease token blob");
                self.send_internal(SorcMessage::new(SorcMessageId::LtBlob, payload), events);
            }
            Err(e) => {
                warn!("security: {}", e);
                self.fail_challenge(None, events);
            }
        }
    }

    fn blob_counter(&self) -> Option<u32> {
        self.credentials
            .as_ref()
            .map(|credentials| credentials.blob.message_counter)
    }

    fn enable_encryption(&mut self, key: &SessionKey, events: &mut Vec<SecureEvent>) {
        let Some(sorc_id) = self.state().sorc_id() else {
            return;
        };
        match EncryptionContext::new(key, Direction::ToSorc) {
            Ok(context) => {
                self.cipher = CipherState::Authenticated(context);
                self.challenger = None;
                info!("security: session with {} established", sorc_id);
                self.publish(
                    SecureConnectionState::Connected { sorc_id },
                    ConnectionAction::ConnectionEstablished { sorc_id },
                    events,
                );
            }
            Err(e) => {
                warn!("security: cannot install session key: {}", e);
                self.fail_challenge(Some(ChallengeError::AesCryptoNotInitialised), events);
            }
        }
    }

    /// `cause` is `None` when the handshake traffic itself was lost.
    fn fail_challenge(&mut self, cause: Option<ChallengeError>, events: &mut Vec<SecureEvent>) {
        self.disconnect_into(
            DisconnectCause::ProtocolFailure(ProtocolFailure::ChallengeFailed(cause)),
            events,
        );
    }

    // ── Sending ──────────────────────────────────────────────

    fn send_internal(&mut self, message: SorcMessage, events: &mut Vec<SecureEvent>) {
        let data = match self.cipher.encrypt_message(&message) {
            Ok(data) => data,
            Err(e) => {
                warn!("security: cannot seal {:?}: {}", message.id, e);
                if self.state().is_connected() {
                    events.push(SecureEvent::MessageSent(Err(SecureError::EncryptionFailed)));
                } else {
                    self.fail_challenge(Some(ChallengeError::AesEncryptionFailed), events);
                }
                return;
            }
        };

        let lower = self.transport.send_data(&data);
        let accepted = !lower
            .iter()
            .any(|e| matches!(e, TransportEvent::DataSent(Err(_))));
        if accepted {
            self.in_flight = Some(message);
        }
        self.process(lower, events);
    }

    // ── Teardown ─────────────────────────────────────────────

    fn disconnect_into(&mut self, cause: DisconnectCause, events: &mut Vec<SecureEvent>) {
        if self.state().is_disconnected() {
            return;
        }
        // Lower reports are superseded by `cause`.
        let _ = self.transport.disconnect();
        self.finish_disconnect(cause, events);
    }

    fn finish_disconnect(&mut self, cause: DisconnectCause, events: &mut Vec<SecureEvent>) {
        let Some(sorc_id) = self.state().sorc_id() else {
            return;
        };
        self.reset();
        info!("security: disconnected from {} ({})", sorc_id, cause);
        self.publish(
            SecureConnectionState::Disconnected,
            cause.into_action(sorc_id),
            events,
        );
    }

    fn reset(&mut self) {
        self.cipher.reset();
        self.challenger = None;
        self.pending_key = None;
        self.in_flight = None;
        self.rejection = None;
        self.credentials = None;
    }

    fn publish(
        &mut self,
        state: SecureConnectionState,
        action: ConnectionAction,
        events: &mut Vec<SecureEvent>,
    ) {
        self.connection.publish(state, action);
        events.push(SecureEvent::ConnectionChanged(Change::new(state, action)));
    }
}
