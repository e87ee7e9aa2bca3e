//! Whole-message send/receive over the frame codec.
//!
//! The communicator tracks at most one outbound [`FramePackage`] and one
//! inbound [`FrameAssembler`].  It never touches the radio: callers hand
//! it radio completions and write out the frame bytes it returns.
//!
//! ```text
//!   begin_send(msg) ──▶ frame₀ bytes ──write──▶ radio
//!   frame_sent()    ──▶ frame₁ bytes ──write──▶ radio
//!   frame_sent()    ──▶ Complete(msg)
//! ```

use log::debug;

use crate::error::TransportError;
use crate::protocol::frame::{DataFrame, FrameAssembler, FramePackage, frame_size_for_mtu};

/// What to do after the radio confirmed a frame write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendProgress {
    /// Write these bytes next.
    Next(Vec<u8>),
    /// The whole message went out.
    Complete(Vec<u8>),
    /// No package was in flight.
    Idle,
}

#[derive(Debug)]
pub struct DataCommunicator {
    default_mtu: usize,
    mtu: usize,
    sending: Option<FramePackage>,
    receiving: FrameAssembler,
}

impl DataCommunicator {
    pub fn new(default_mtu: usize) -> Self {
        Self {
            default_mtu,
            mtu: default_mtu,
            sending: None,
            receiving: FrameAssembler::new(),
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Takes effect from the next package; the one in flight keeps its
    /// frame size.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// A package is being sent or received.
    pub fn is_busy(&self) -> bool {
        self.sending.is_some() || self.receiving.is_active()
    }

    /// Split `message` into frames and return the first one to write.
    pub fn begin_send(&mut self, message: &[u8]) -> Result<Vec<u8>, TransportError> {
        if self.is_busy() {
            return Err(TransportError::SendingInProgress);
        }
        let package = FramePackage::new(message, frame_size_for_mtu(self.mtu))?;
        let first = package
            .current_frame()
            .map(DataFrame::to_bytes)
            .ok_or(TransportError::InvalidFrame)?;
        debug!(
            "transport: sending {} bytes in {} frame(s)",
            message.len(),
            package.frames().len()
        );
        self.sending = Some(package);
        Ok(first)
    }

    /// The radio confirmed the current frame.
    pub fn frame_sent(&mut self) -> SendProgress {
        let Some(package) = self.sending.as_mut() else {
            return SendProgress::Idle;
        };
        package.advance();
        if let Some(frame) = package.current_frame() {
            return SendProgress::Next(frame.to_bytes());
        }
        match self.sending.take() {
            Some(package) => SendProgress::Complete(package.into_message()),
            None => SendProgress::Idle,
        }
    }

    /// Drop the outbound package; returns `true` if one was in flight.
    ///
    /// Used both when a write fails and when the MTU reply overtakes the
    /// confirmation of the MTU request's last frame.
    pub fn reset_sending(&mut self) -> bool {
        self.sending.take().is_some()
    }

    /// Feed one received frame; yields the message once its package closes.
    pub fn frame_received(&mut self, raw: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        let frame = match DataFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.receiving.reset();
                return Err(e.into());
            }
        };
        Ok(self.receiving.push(frame))
    }

    pub fn reset_receiving(&mut self) {
        self.receiving.reset();
    }

    /// Drop both packages and fall back to the default MTU.
    pub fn reset(&mut self) {
        self.sending = None;
        self.receiving.reset();
        self.mtu = self.default_mtu;
    }
}
