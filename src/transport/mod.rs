//! Transport layer: MTU framing over the radio plus the connection state
//! machine that negotiates the MTU.

pub mod communicator;
pub mod manager;

pub use communicator::{DataCommunicator, SendProgress};
pub use manager::{
    TransportAction, TransportChange, TransportConnectingState, TransportEvent, TransportManager,
    TransportState,
};
