//! Application messages exchanged with the SORC.
//!
//! A [`SorcMessage`] is one id byte followed by an id-specific payload.
//! It is what gets framed (before authentication) or encrypted and then
//! framed (after authentication).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{ChallengeError, LeaseError};
use crate::lease::SorcId;

/// Message type tag, byte 0 of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SorcMessageId {
    ChallengePhone = 0x01,
    ChallengeSorcResponse = 0x02,
    BadChallengeSorcResponse = 0x03,
    ChallengePhoneResponse = 0x04,
    BadChallengePhoneResponse = 0x05,
    MtuRequest = 0x06,
    MtuReceive = 0x07,
    LtAck = 0x09,
    LtBlobRequest = 0x0A,
    LtBlob = 0x0B,
    HeartbeatRequest = 0x0C,
    HeartbeatResponse = 0x0D,
    PhoneTest = 0x10,
    SorcTest = 0x13,
    ServiceGrant = 0x20,
    ServiceGrantTrigger = 0x30,
    /// Sentinel for unknown ids and failed decryption.
    NotValid = 0xC8,
}

impl From<u8> for SorcMessageId {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => Self::ChallengePhone,
            0x02 => Self::ChallengeSorcResponse,
            0x03 => Self::BadChallengeSorcResponse,
            0x04 => Self::ChallengePhoneResponse,
            0x05 => Self::BadChallengePhoneResponse,
            0x06 => Self::MtuRequest,
            0x07 => Self::MtuReceive,
            0x09 => Self::LtAck,
            0x0A => Self::LtBlobRequest,
            0x0B => Self::LtBlob,
            0x0C => Self::HeartbeatRequest,
            0x0D => Self::HeartbeatResponse,
            0x10 => Self::PhoneTest,
            0x13 => Self::SorcTest,
            0x20 => Self::ServiceGrant,
            0x30 => Self::ServiceGrantTrigger,
            _ => Self::NotValid,
        }
    }
}

/// One message: id plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SorcMessage {
    pub id: SorcMessageId,
    pub payload: Vec<u8>,
}

impl SorcMessage {
    pub fn new(id: SorcMessageId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// A message with no payload.
    pub fn empty(id: SorcMessageId) -> Self {
        Self::new(id, Vec::new())
    }

    /// The sentinel handed upward when data cannot be decrypted.
    pub fn not_valid() -> Self {
        Self::empty(SorcMessageId::NotValid)
    }

    pub fn is_valid(&self) -> bool {
        self.id != SorcMessageId::NotValid
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.id as u8);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse raw message bytes; empty input yields the sentinel.
    pub fn from_bytes(raw: &[u8]) -> Self {
        match raw.split_first() {
            Some((&id, payload)) => Self::new(SorcMessageId::from(id), payload),
            None => Self::not_valid(),
        }
    }
}

// ── MTU ──────────────────────────────────────────────────────

/// MTU announced in an `MtuReceive` payload (first byte).
pub fn parse_mtu(payload: &[u8]) -> Option<usize> {
    payload.first().map(|&b| usize::from(b))
}

// ── Challenge payloads ───────────────────────────────────────

/// Bytes of a challenge payload: three 36-char ids and a 16-byte block.
pub const CHALLENGE_PAYLOAD_SIZE: usize = 36 * 3 + 16;

/// Payload of `ChallengePhone`.
///
/// Layout: lease id, SORC id (lowercase hyphenated), lease token id
/// (lowercased), then `b0`.
pub fn challenge_phone_payload(
    lease_id: &str,
    sorc_id: &SorcId,
    lease_token_id: &str,
    b0: &[u8; 16],
) -> Vec<u8> {
    let sorc = sorc_id.hyphenated().to_string();
    let token = lease_token_id.to_lowercase();

    // Ids are written as given; longer ones are never truncated.
    let len = lease_id.len() + sorc.len() + token.len() + b0.len();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(lease_id.as_bytes());
    out.extend_from_slice(sorc.as_bytes());
    out.extend_from_slice(token.as_bytes());
    out.extend_from_slice(b0);
    out
}

/// `b1` and `b2` from a `ChallengeSorcResponse` payload.
pub fn parse_sorc_response(payload: &[u8]) -> Result<([u8; 16], [u8; 16]), ChallengeError> {
    if payload.len() < 32 {
        return Err(ChallengeError::ResponseIsCorrupt);
    }
    let mut b1 = [0u8; 16];
    let mut b2 = [0u8; 16];
    b1.copy_from_slice(&payload[..16]);
    b2.copy_from_slice(&payload[16..32]);
    Ok((b1, b2))
}

/// Blob counter the SORC reports in `BadChallengeSorcResponse`
/// (big-endian u32 at payload bytes 1..5), if present.
pub fn parse_bad_challenge_counter(payload: &[u8]) -> Option<u32> {
    let bytes = payload.get(1..5)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Blob counter the SORC holds, from an `LtBlobRequest` payload
/// (little-endian u32; short payloads are zero-extended).
pub fn parse_blob_request(payload: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = payload.len().min(4);
    buf[..n].copy_from_slice(&payload[..n]);
    u32::from_le_bytes(buf)
}

/// Payload of `LtBlob`: the base64-decoded blob data.
pub fn lt_blob_payload(blob_data: &str) -> Result<Vec<u8>, LeaseError> {
    if blob_data.is_empty() {
        return Err(LeaseError::InvalidBlob);
    }
    STANDARD
        .decode(blob_data)
        .map_err(|_| LeaseError::InvalidBlob)
}

// ── Service grants ───────────────────────────────────────────

/// Service grant identifier.
pub type ServiceGrantId = u16;

/// Payload of a `ServiceGrant` request.
pub fn service_grant_request_payload(id: ServiceGrantId) -> Vec<u8> {
    id.to_le_bytes().to_vec()
}

/// Outcome reported by the SORC for a service grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceGrantStatus {
    Success = 0x00,
    Pending = 0x01,
    Failure = 0x02,
    NotAllowed = 0x03,
    InvalidTimeFrame = 0x04,
}

impl TryFrom<u8> for ServiceGrantStatus {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::Pending),
            0x02 => Ok(Self::Failure),
            0x03 => Ok(Self::NotAllowed),
            0x04 => Ok(Self::InvalidTimeFrame),
            other => Err(other),
        }
    }
}

/// A decoded `ServiceGrantTrigger`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGrantResponse {
    pub sorc_id: SorcId,
    pub service_grant_id: ServiceGrantId,
    pub status: ServiceGrantStatus,
    pub response_data: String,
}

impl ServiceGrantResponse {
    /// Decode `[id lo, id hi, status, ascii...]`.
    ///
    /// Returns `None` for short payloads, unknown status bytes or
    /// non-ASCII response data.
    pub fn parse(sorc_id: SorcId, payload: &[u8]) -> Option<Self> {
        if payload.len() < 3 {
            return None;
        }
        let service_grant_id = u16::from_le_bytes([payload[0], payload[1]]);
        let status = ServiceGrantStatus::try_from(payload[2]).ok()?;

        let data = &payload[3..];
        if !data.is_ascii() {
            return None;
        }
        let text = core::str::from_utf8(data).ok()?;

        Some(Self {
            sorc_id,
            service_grant_id,
            status,
            response_data: text.trim_matches(char::is_control).to_string(),
        })
    }
}
