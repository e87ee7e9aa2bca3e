//! Service grant change stream.

use core::fmt;

use crate::change::{Change, ChangeAction};
use crate::protocol::message::{ServiceGrantId, ServiceGrantResponse};

/// Ids of requests accepted but not yet answered, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceGrantState {
    pub requesting_service_grant_ids: Vec<ServiceGrantId>,
}

/// Why an outstanding request was given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFailedError {
    SendingFailed,
    ReceivedInvalidData,
}

impl fmt::Display for RequestFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendingFailed => write!(f, "sending failed"),
            Self::ReceivedInvalidData => write!(f, "received invalid data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceGrantAction {
    Initial,
    /// `accepted` is `false` when the request queue was full.
    RequestServiceGrant { id: ServiceGrantId, accepted: bool },
    ResponseReceived(ServiceGrantResponse),
    RequestFailed(RequestFailedError),
    /// The connection ended; every pending request is gone.
    Reset,
}

impl ChangeAction for ServiceGrantAction {
    fn initial() -> Self {
        Self::Initial
    }
}

pub type ServiceGrantChange = Change<ServiceGrantState, ServiceGrantAction>;
