//! Connection states, actions and disconnect causes shared by the
//! transport, security and session layers.
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting(id, sub) ──…──▶ Connected(id)
//!        ▲                          │                        │
//!        └────── disconnect / connectingFailed / connectionLost
//! ```
//!
//! Each layer picks its own connecting sub-state.  Sub-states only move
//! forward while connecting to the same SORC; events for any other id are
//! stale and dropped.

use core::fmt;

use crate::error::ChallengeError;

use crate::change::{Change, ChangeAction};
use crate::lease::SorcId;

// ── State ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState<Sub> {
    Disconnected,
    Connecting { sorc_id: SorcId, state: Sub },
    Connected { sorc_id: SorcId },
}

impl<Sub: Copy + PartialEq> ConnectionState<Sub> {
    pub fn sorc_id(&self) -> Option<SorcId> {
        match self {
            Self::Disconnected => None,
            Self::Connecting { sorc_id, .. } | Self::Connected { sorc_id } => Some(*sorc_id),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// `true` while connecting to `sorc_id` in sub-state `sub`.
    pub fn is_connecting_in(&self, sorc_id: SorcId, sub: Sub) -> bool {
        matches!(self, Self::Connecting { sorc_id: id, state } if *id == sorc_id && *state == sub)
    }

    /// The connected SORC, if any.
    pub fn connected_sorc(&self) -> Option<SorcId> {
        match self {
            Self::Connected { sorc_id } => Some(*sorc_id),
            _ => None,
        }
    }
}

impl<Sub: fmt::Debug> fmt::Display for ConnectionState<Sub> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting { state, .. } => write!(f, "connecting({state:?})"),
            Self::Connected { .. } => write!(f, "connected"),
        }
    }
}

/// Connecting sub-state at the security and session layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectingState {
    /// Waiting for the radio link.
    Physical,
    /// Link up, negotiating the MTU.
    Transport,
    /// Running the challenge-response handshake.
    Challenging,
}

pub type SecureConnectionState = ConnectionState<ConnectingState>;

// ── Errors carried by actions ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectingFailedError {
    PhysicalConnectingFailed,
    InvalidMtuResponse,
    /// The handshake failed.  Carries the handshake error, or `None` when
    /// the handshake traffic itself could not be sent or received.
    ChallengeFailed(Option<ChallengeError>),
    BlobOutdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLostError {
    PhysicalConnectionLost,
    HeartbeatTimedOut,
}

// ── Action ───────────────────────────────────────────────────

/// Why the security or session state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Initial,
    Connect { sorc_id: SorcId },
    PhysicalConnectionEstablished { sorc_id: SorcId },
    TransportConnectionEstablished { sorc_id: SorcId },
    ConnectionEstablished { sorc_id: SorcId },
    ConnectingFailed { sorc_id: SorcId, error: ConnectingFailedError },
    Disconnect,
    ConnectionLost { error: ConnectionLostError },
}

impl ChangeAction for ConnectionAction {
    fn initial() -> Self {
        Self::Initial
    }
}

/// The public connection stream item.
pub type ConnectionChange = Change<SecureConnectionState, ConnectionAction>;

// ── Disconnect cause ─────────────────────────────────────────

/// Radio-level reasons a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    ConnectingFailed,
    ConnectionLost,
}

/// Reasons a layer above the radio gave up on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFailure {
    InvalidMtuResponse,
    ChallengeFailed(Option<ChallengeError>),
    BlobOutdated,
    HeartbeatTimedOut,
}

/// What ended a connection, passed explicitly into the teardown call.
///
/// A layer that tears down its own connection drops the reports of the
/// layers below; the cause it was handed decides the published action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    UserRequested,
    Transport(LinkFailure),
    ProtocolFailure(ProtocolFailure),
}

/// The terminal action family a cause maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnect,
    ConnectingFailed(ConnectingFailedError),
    ConnectionLost(ConnectionLostError),
}

impl DisconnectCause {
    pub fn outcome(self) -> DisconnectOutcome {
        match self {
            Self::UserRequested => DisconnectOutcome::Disconnect,
            Self::Transport(LinkFailure::ConnectingFailed) => {
                DisconnectOutcome::ConnectingFailed(ConnectingFailedError::PhysicalConnectingFailed)
            }
            Self::Transport(LinkFailure::ConnectionLost) => {
                DisconnectOutcome::ConnectionLost(ConnectionLostError::PhysicalConnectionLost)
            }
            Self::ProtocolFailure(ProtocolFailure::InvalidMtuResponse) => {
                DisconnectOutcome::ConnectingFailed(ConnectingFailedError::InvalidMtuResponse)
            }
            Self::ProtocolFailure(ProtocolFailure::ChallengeFailed(cause)) => {
                DisconnectOutcome::ConnectingFailed(ConnectingFailedError::ChallengeFailed(cause))
            }
            Self::ProtocolFailure(ProtocolFailure::BlobOutdated) => {
                DisconnectOutcome::ConnectingFailed(ConnectingFailedError::BlobOutdated)
            }
            Self::ProtocolFailure(ProtocolFailure::HeartbeatTimedOut) => {
                DisconnectOutcome::ConnectionLost(ConnectionLostError::HeartbeatTimedOut)
            }
        }
    }

    pub fn from_connecting_failed(error: ConnectingFailedError) -> Self {
        match error {
            ConnectingFailedError::PhysicalConnectingFailed => {
                Self::Transport(LinkFailure::ConnectingFailed)
            }
            ConnectingFailedError::InvalidMtuResponse => {
                Self::ProtocolFailure(ProtocolFailure::InvalidMtuResponse)
            }
            ConnectingFailedError::ChallengeFailed(cause) => {
                Self::ProtocolFailure(ProtocolFailure::ChallengeFailed(cause))
            }
            ConnectingFailedError::BlobOutdated => Self::ProtocolFailure(ProtocolFailure::BlobOutdated),
        }
    }

    pub fn from_connection_lost(error: ConnectionLostError) -> Self {
        match error {
            ConnectionLostError::PhysicalConnectionLost => Self::Transport(LinkFailure::ConnectionLost),
            ConnectionLostError::HeartbeatTimedOut => {
                Self::ProtocolFailure(ProtocolFailure::HeartbeatTimedOut)
            }
        }
    }

    /// The connection action published for this cause.
    pub fn into_action(self, sorc_id: SorcId) -> ConnectionAction {
        match self.outcome() {
            DisconnectOutcome::Disconnect => ConnectionAction::Disconnect,
            DisconnectOutcome::ConnectingFailed(error) => {
                ConnectionAction::ConnectingFailed { sorc_id, error }
            }
            DisconnectOutcome::ConnectionLost(error) => ConnectionAction::ConnectionLost { error },
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "user requested"),
            Self::Transport(link) => write!(f, "transport: {link:?}"),
            Self::ProtocolFailure(p) => write!(f, "protocol: {p:?}"),
        }
    }
}
