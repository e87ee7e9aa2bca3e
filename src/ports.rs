//! Port traits: the boundary between the protocol stack and the radio,
//! the clock and telemetry.
//!
//! ```text
//!   BLE adapter ──handle_*──▶ SorcManager ──Transport──▶ BLE adapter
//!                               │    │
//!                          Clock ┘    └ EventSink ──▶ log / analytics
//! ```
//!
//! The stack never touches a radio or a wall clock directly.  Adapters
//! implement these traits; tests substitute recording mocks.

use core::fmt::Debug;
use core::time::Duration;

use crate::events::AccessEvent;
use crate::lease::SorcId;

// ───────────────────────────────────────────────────────────────
// Transport port (stack → radio)
// ───────────────────────────────────────────────────────────────

/// Outbound half of the BLE radio.
///
/// Every call returns immediately.  Completion of `connect` and of each
/// `write` is reported back through the manager's `handle_*` methods.
pub trait Transport {
    /// Adapter-specific write failure.
    type Error: Debug;

    /// Start connecting to the peripheral advertising `sorc_id`.
    fn connect(&mut self, sorc_id: SorcId);

    /// Drop the current link, if any.  Treated as taking effect at once.
    fn disconnect(&mut self);

    /// Queue one characteristic write (write-with-response).
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Turn advertisement scanning on or off.
    fn set_scanning(&mut self, enabled: bool);
}

/// Link-level reports from the radio, fed in via
/// `SorcManager::handle_physical_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalEvent {
    Connected(SorcId),
    ConnectingFailed(SorcId),
    Disconnected(SorcId),
    ConnectionLost(SorcId),
}

impl PhysicalEvent {
    pub fn sorc_id(&self) -> SorcId {
        match *self {
            Self::Connected(id)
            | Self::ConnectingFailed(id)
            | Self::Disconnected(id)
            | Self::ConnectionLost(id) => id,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time source driving timers and discovery ageing.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (stack → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The session layer emits structured [`AccessEvent`]s through this port.
/// The sink is passed in at each call site rather than stored.
pub trait EventSink {
    fn emit(&mut self, event: &AccessEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&mut self, _event: &AccessEvent) {}
}
