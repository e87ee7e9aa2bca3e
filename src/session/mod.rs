//! Session layer: liveness and the request queue on top of a secure
//! connection.
//!
//! ```text
//!   request_service_grant ──▶ ┌──────────────┐
//!   heartbeat timer ─────────▶ │ BoundedQueue │──▶ slot: Idle | AwaitingResponse
//!                              └──────────────┘            │ send_message
//!                                                          ▼
//!                                                   SecurityManager
//! ```
//!
//! Only one request is on the wire at a time.  The slot is released by
//! the matching response; a send failure or an unreadable answer flushes
//! the queue and re-checks the link with a heartbeat.  A separate check
//! timer drops the session when nothing has been heard for the
//! heartbeat timeout.
//!
//! Every call takes `now` and the telemetry sink from the caller.

pub mod service_grant;

use core::time::Duration;

use log::{debug, info, warn};

use crate::bounded_queue::BoundedQueue;
use crate::change::ChangeSubject;
use crate::config::AccessConfig;
use crate::connection::{
    ConnectingState, ConnectionAction, ConnectionChange, DisconnectCause, ProtocolFailure,
    SecureConnectionState,
};
use crate::error::{SecureError, TransportError};
use crate::events::AccessEvent;
use crate::lease::{LeaseToken, LeaseTokenBlob};
use crate::ports::{EventSink, PhysicalEvent, Transport};
use crate::protocol::message::{
    ServiceGrantId, ServiceGrantResponse, SorcMessage, SorcMessageId,
    service_grant_request_payload,
};
use crate::security::{SecureEvent, SecurityManager};
use crate::timer::RepeatingTimer;

pub use service_grant::{
    RequestFailedError, ServiceGrantAction, ServiceGrantChange, ServiceGrantState,
};

// ── Requests ─────────────────────────────────────────────────

/// A request waiting in the queue or on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    Heartbeat,
    ServiceGrant(ServiceGrantId),
}

impl PendingRequest {
    fn message(self) -> SorcMessage {
        match self {
            Self::Heartbeat => SorcMessage::empty(SorcMessageId::HeartbeatRequest),
            Self::ServiceGrant(id) => SorcMessage::new(
                SorcMessageId::ServiceGrant,
                service_grant_request_payload(id),
            ),
        }
    }
}

/// What the session is waiting for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestSlot {
    #[default]
    Idle,
    AwaitingResponse(PendingRequest),
}

// ── Manager ──────────────────────────────────────────────────

pub struct SessionManager<T: Transport> {
    security: SecurityManager<T>,
    connection: ChangeSubject<SecureConnectionState, ConnectionAction>,
    service_grant: ChangeSubject<ServiceGrantState, ServiceGrantAction>,
    queue: BoundedQueue<PendingRequest>,
    slot: RequestSlot,
    heartbeat_timer: RepeatingTimer,
    check_timer: RepeatingTimer,
    heartbeat_timeout: Duration,
    last_heard: Duration,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(security: SecurityManager<T>, config: &AccessConfig) -> Self {
        Self {
            security,
            connection: ChangeSubject::new(SecureConnectionState::Disconnected),
            service_grant: ChangeSubject::new(ServiceGrantState::default()),
            queue: BoundedQueue::new(usize::from(config.max_enqueued_messages)),
            slot: RequestSlot::Idle,
            heartbeat_timer: RepeatingTimer::new(config.heartbeat_interval()),
            check_timer: RepeatingTimer::new(config.heartbeat_timeout()),
            heartbeat_timeout: config.heartbeat_timeout(),
            last_heard: Duration::ZERO,
        }
    }

    pub fn state(&self) -> SecureConnectionState {
        *self.connection.state()
    }

    pub fn slot(&self) -> RequestSlot {
        self.slot
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn connection_change(
        &mut self,
    ) -> &mut ChangeSubject<SecureConnectionState, ConnectionAction> {
        &mut self.connection
    }

    pub fn service_grant_change(
        &mut self,
    ) -> &mut ChangeSubject<ServiceGrantState, ServiceGrantAction> {
        &mut self.service_grant
    }

    pub fn security(&self) -> &SecurityManager<T> {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityManager<T> {
        &mut self.security
    }

    // ── Commands ─────────────────────────────────────────────

    pub fn connect(
        &mut self,
        token: LeaseToken,
        blob: LeaseTokenBlob,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        let sorc_id = token.sorc_id();
        let state = self.state();
        if !state.is_disconnected() && !state.is_connecting_in(sorc_id, ConnectingState::Physical) {
            debug!("session: ignoring connect to {} while {}", sorc_id, state);
            return;
        }
        let events = self.security.connect(token, blob);
        self.process(events, now, sink);
    }

    pub fn disconnect(&mut self, now: Duration, sink: &mut impl EventSink) {
        self.disconnect_with(DisconnectCause::UserRequested, now, sink);
    }

    /// Queue a service grant.  Returns whether it was accepted; nothing
    /// happens unless a session is up.
    pub fn request_service_grant(
        &mut self,
        id: ServiceGrantId,
        now: Duration,
        sink: &mut impl EventSink,
    ) -> bool {
        let Some(sorc_id) = self.state().connected_sorc() else {
            debug!("session: service grant {} dropped, not connected", id);
            return false;
        };

        let accepted = match self.queue.enqueue(PendingRequest::ServiceGrant(id)) {
            Ok(()) => true,
            Err(e) => {
                warn!("session: service grant {} rejected: {}", id, e);
                false
            }
        };

        let mut state = self.service_grant.state().clone();
        if accepted {
            state.requesting_service_grant_ids.push(id);
        }
        self.service_grant
            .publish(state, ServiceGrantAction::RequestServiceGrant { id, accepted });
        sink.emit(&AccessEvent::ServiceGrantRequested {
            sorc_id,
            id,
            accepted,
        });

        self.send_next(now, sink);
        accepted
    }

    // ── Inputs ───────────────────────────────────────────────

    pub fn handle_physical_event(
        &mut self,
        event: PhysicalEvent,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        let events = self.security.handle_physical_event(event);
        self.process(events, now, sink);
    }

    pub fn handle_frame_sent(
        &mut self,
        result: Result<(), TransportError>,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        let events = self.security.handle_frame_sent(result);
        self.process(events, now, sink);
    }

    pub fn handle_frame_received(
        &mut self,
        result: Result<Vec<u8>, TransportError>,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        let events = self.security.handle_frame_received(result);
        self.process(events, now, sink);
    }

    /// Drive the heartbeat and liveness timers.
    pub fn tick(&mut self, now: Duration, sink: &mut impl EventSink) {
        if !self.state().is_connected() {
            return;
        }
        if self.check_timer.poll(now) && now.saturating_sub(self.last_heard) >= self.heartbeat_timeout
        {
            warn!(
                "session: nothing heard for {:?}, dropping session",
                now.saturating_sub(self.last_heard)
            );
            self.disconnect_with(
                DisconnectCause::ProtocolFailure(ProtocolFailure::HeartbeatTimedOut),
                now,
                sink,
            );
            return;
        }
        if self.heartbeat_timer.poll(now) {
            self.enqueue_heartbeat(now, sink);
        }
    }

    // ── Security reports ─────────────────────────────────────

    fn process(&mut self, events: Vec<SecureEvent>, now: Duration, sink: &mut impl EventSink) {
        for event in events {
            match event {
                SecureEvent::ConnectionChanged(change) => {
                    self.handle_connection_change(change, now, sink);
                }
                SecureEvent::MessageSent(result) => self.handle_message_sent(result, now, sink),
                SecureEvent::MessageReceived(result) => {
                    self.handle_message_received(result, now, sink);
                }
            }
        }
    }

    fn handle_connection_change(
        &mut self,
        change: ConnectionChange,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        match change.state {
            SecureConnectionState::Connecting { .. } => {
                self.publish(change.state, change.action, sink);
            }
            SecureConnectionState::Connected { sorc_id } => {
                info!("session: connected to {}", sorc_id);
                self.last_heard = now;
                self.heartbeat_timer.start(now);
                self.check_timer.start(now);
                self.publish(change.state, change.action, sink);
            }
            SecureConnectionState::Disconnected => {
                if self.state().is_disconnected() {
                    return;
                }
                self.reset();
                self.publish(change.state, change.action, sink);
            }
        }
    }

    fn handle_message_sent(
        &mut self,
        result: Result<SorcMessage, SecureError>,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        match result {
            Ok(message) => debug!("session: {:?} sent, awaiting response", message.id),
            Err(e) => {
                warn!("session: send failed: {}", e);
                self.request_failed(RequestFailedError::SendingFailed, now, sink);
            }
        }
    }

    fn handle_message_received(
        &mut self,
        result: Result<SorcMessage, SecureError>,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("session: unreadable message: {}", e);
                self.request_failed(RequestFailedError::ReceivedInvalidData, now, sink);
                return;
            }
        };
        self.last_heard = now;

        match message.id {
            SorcMessageId::HeartbeatResponse => {
                if self.slot == RequestSlot::AwaitingResponse(PendingRequest::Heartbeat) {
                    self.slot = RequestSlot::Idle;
                }
                self.send_next(now, sink);
            }
            SorcMessageId::ServiceGrantTrigger => {
                let Some(sorc_id) = self.state().connected_sorc() else {
                    return;
                };
                match ServiceGrantResponse::parse(sorc_id, &message.payload) {
                    Some(response) => self.response_received(response, now, sink),
                    None => {
                        warn!("session: malformed service grant response");
                        self.request_failed(RequestFailedError::ReceivedInvalidData, now, sink);
                    }
                }
            }
            other => debug!("session: ignoring {:?}", other),
        }
    }

    fn response_received(
        &mut self,
        response: ServiceGrantResponse,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        let id = response.service_grant_id;
        if let RequestSlot::AwaitingResponse(PendingRequest::ServiceGrant(pending)) = self.slot {
            if pending != id {
                warn!("session: response for {} while awaiting {}", id, pending);
            }
            self.slot = RequestSlot::Idle;
        }

        let mut state = self.service_grant.state().clone();
        if !state.requesting_service_grant_ids.is_empty() {
            state.requesting_service_grant_ids.remove(0);
        }
        sink.emit(&AccessEvent::ServiceGrantResponded {
            sorc_id: response.sorc_id,
            id,
            status: response.status,
        });
        self.service_grant
            .publish(state, ServiceGrantAction::ResponseReceived(response));

        self.send_next(now, sink);
    }

    /// Give up on whatever is outstanding.
    fn request_failed(&mut self, error: RequestFailedError, now: Duration, sink: &mut impl EventSink) {
        match core::mem::take(&mut self.slot) {
            RequestSlot::AwaitingResponse(PendingRequest::ServiceGrant(id)) => {
                warn!("session: service grant {} failed: {}", id, error);
                self.queue.clear();
                self.service_grant.publish(
                    ServiceGrantState::default(),
                    ServiceGrantAction::RequestFailed(error),
                );
                if let Some(sorc_id) = self.state().sorc_id() {
                    sink.emit(&AccessEvent::ServiceGrantFailed { sorc_id, error });
                }
                self.enqueue_heartbeat(now, sink);
            }
            RequestSlot::AwaitingResponse(PendingRequest::Heartbeat) => {
                // Left to the liveness check; no follow-up heartbeat.
                warn!("session: heartbeat failed: {}", error);
                self.send_next(now, sink);
            }
            RequestSlot::Idle => debug!("session: {} with nothing outstanding", error),
        }
    }

    // ── Queue ────────────────────────────────────────────────

    fn enqueue_heartbeat(&mut self, now: Duration, sink: &mut impl EventSink) {
        let pending = self.slot == RequestSlot::AwaitingResponse(PendingRequest::Heartbeat)
            || self.queue.iter().any(|r| *r == PendingRequest::Heartbeat);
        if pending {
            debug!("session: heartbeat already pending");
        } else if let Err(e) = self.queue.enqueue(PendingRequest::Heartbeat) {
            warn!("session: heartbeat not queued: {}", e);
        }
        self.send_next(now, sink);
    }

    fn send_next(&mut self, now: Duration, sink: &mut impl EventSink) {
        if self.slot != RequestSlot::Idle || !self.state().is_connected() {
            return;
        }
        let Some(request) = self.queue.dequeue() else {
            return;
        };
        debug!("session: sending {:?}", request);
        self.slot = RequestSlot::AwaitingResponse(request);
        let events = self.security.send_message(request.message());
        self.process(events, now, sink);
    }

    // ── Teardown ─────────────────────────────────────────────

    fn disconnect_with(&mut self, cause: DisconnectCause, now: Duration, sink: &mut impl EventSink) {
        let events = self.security.disconnect_with(cause);
        self.process(events, now, sink);
    }

    fn reset(&mut self) {
        self.heartbeat_timer.stop();
        self.check_timer.stop();
        self.slot = RequestSlot::Idle;
        self.queue.clear();
        self.service_grant
            .publish(ServiceGrantState::default(), ServiceGrantAction::Reset);
    }

    fn publish(
        &mut self,
        state: SecureConnectionState,
        action: ConnectionAction,
        sink: &mut impl EventSink,
    ) {
        let from = self.state();
        sink.emit(&AccessEvent::ConnectionChanged { from, to: state });
        match action {
            ConnectionAction::ConnectingFailed { sorc_id, error } => {
                sink.emit(&AccessEvent::ConnectingFailed { sorc_id, error });
            }
            ConnectionAction::ConnectionLost { error } => {
                if let Some(sorc_id) = from.sorc_id() {
                    sink.emit(&AccessEvent::ConnectionLost { sorc_id, error });
                }
            }
            _ => {}
        }
        self.connection.publish(state, action);
    }
}
