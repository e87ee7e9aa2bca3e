//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing each [`AccessEvent`] as one line
//! through the `log` facade.  An analytics adapter would implement the
//! same trait.

use log::info;

use crate::events::AccessEvent;
use crate::ports::EventSink;

/// Adapter that logs every [`AccessEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AccessEvent) {
        match event {
            AccessEvent::ConnectionChanged { from, to } => {
                info!("CONN | {} -> {}", from, to);
            }
            AccessEvent::ConnectingFailed { sorc_id, error } => {
                info!("CONN | connecting to {} failed: {:?}", sorc_id, error);
            }
            AccessEvent::ConnectionLost { sorc_id, error } => {
                info!("CONN | lost {}: {:?}", sorc_id, error);
            }
            AccessEvent::ServiceGrantRequested {
                sorc_id,
                id,
                accepted,
            } => {
                info!(
                    "GRANT | request id={} sorc={} {}",
                    id,
                    sorc_id,
                    if *accepted { "queued" } else { "rejected (queue full)" }
                );
            }
            AccessEvent::ServiceGrantResponded {
                sorc_id,
                id,
                status,
            } => {
                info!("GRANT | response id={} sorc={} status={:?}", id, sorc_id, status);
            }
            AccessEvent::ServiceGrantFailed { sorc_id, error } => {
                info!("GRANT | request to {} failed: {:?}", sorc_id, error);
            }
        }
    }
}
