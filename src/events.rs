//! Outbound telemetry events.
//!
//! The [`SessionManager`](crate::session::SessionManager) emits these
//! through the [`EventSink`](crate::ports::EventSink) port.  They mirror
//! the public change streams but are flat and loggable, for analytics
//! pipelines that do not want to subscribe.

use crate::connection::{ConnectingFailedError, ConnectionLostError, SecureConnectionState};
use crate::lease::SorcId;
use crate::protocol::message::{ServiceGrantId, ServiceGrantStatus};
use crate::session::service_grant::RequestFailedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessEvent {
    /// The session-level connection state moved.
    ConnectionChanged {
        from: SecureConnectionState,
        to: SecureConnectionState,
    },

    /// A connection attempt ended before the session was up.
    ConnectingFailed {
        sorc_id: SorcId,
        error: ConnectingFailedError,
    },

    /// An established session ended without being asked to.
    ConnectionLost {
        sorc_id: SorcId,
        error: ConnectionLostError,
    },

    /// A service grant was offered to the request queue.
    ServiceGrantRequested {
        sorc_id: SorcId,
        id: ServiceGrantId,
        accepted: bool,
    },

    /// The SORC answered a service grant.
    ServiceGrantResponded {
        sorc_id: SorcId,
        id: ServiceGrantId,
        status: ServiceGrantStatus,
    },

    /// An outstanding request failed; the queue was flushed.
    ServiceGrantFailed {
        sorc_id: SorcId,
        error: RequestFailedError,
    },
}
