//! In-process SORC peer.
//!
//! [`SimulatedSorc`] plays the peripheral side of the protocol: it answers
//! the MTU request, runs its half of the challenge (computing `b1`/`b2`
//! and checking `b3`), and after that seals and opens messages with the
//! mirrored session context.  [`SimulatedLink`] wraps it as a
//! [`Transport`] so a whole stack can be driven without a radio:
//!
//! ```text
//!   stack ──write──▶ SimulatedLink.outbox ──pump──▶ SimulatedSorc
//!     ▲                                               │
//!     └──────── handle_frame_received(reply) ─────────┘
//! ```
//!
//! The pump itself lives with the caller, which decides when each write
//! completes and when replies arrive.

use std::collections::VecDeque;

use log::{debug, warn};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::LeaseError;
use crate::lease::{LeaseToken, SorcId};
use crate::ports::Transport;
use crate::protocol::frame::{DataFrame, FrameAssembler, FramePackage, frame_size_for_mtu};
use crate::protocol::message::{ServiceGrantId, ServiceGrantStatus, SorcMessage, SorcMessageId};
use crate::security::challenge::{derive_session_key, rotate, rotate_inverse};
use crate::security::crypto::{BLOCK_SIZE, Block, BlockCipher, Direction, EncryptionContext, xor};

struct Handshake {
    nc: Block,
    nr: Block,
    b2: Block,
}

/// Peripheral side of one SORC.
pub struct SimulatedSorc {
    sorc_id: SorcId,
    cipher: BlockCipher,
    mtu: u8,
    /// Counter the SORC insists on before it will answer a challenge.
    required_blob: Option<u32>,
    /// Counter advertised in an `LtBlobRequest` before the first challenge.
    blob_request: Option<u32>,
    forge_response: bool,
    corrupt_response: bool,
    answer_heartbeats: bool,
    answer_grants: bool,
    grant_status: ServiceGrantStatus,
    grant_data: String,
    handshake: Option<Handshake>,
    session: Option<EncryptionContext>,
    assembler: FrameAssembler,
    received: Vec<SorcMessage>,
}

impl SimulatedSorc {
    /// A SORC sharing `token`'s access key.
    pub fn for_token(token: &LeaseToken) -> Result<Self, LeaseError> {
        let key = token.access_key_bytes()?;
        let cipher = BlockCipher::new(&key).map_err(|_| LeaseError::InvalidAccessKey)?;
        Ok(Self {
            sorc_id: token.sorc_id(),
            cipher,
            mtu: 20,
            required_blob: None,
            blob_request: None,
            forge_response: false,
            corrupt_response: false,
            answer_heartbeats: true,
            answer_grants: true,
            grant_status: ServiceGrantStatus::Success,
            grant_data: String::from("OK"),
            handshake: None,
            session: None,
            assembler: FrameAssembler::new(),
            received: Vec::new(),
        })
    }

    // ── Behaviour ────────────────────────────────────────────

    /// MTU reported in the `MtuReceive` answer.
    pub fn with_mtu(mut self, mtu: u8) -> Self {
        self.mtu = mtu;
        self
    }

    /// Answer challenges with `badChallengeSorcResponse(counter)` until a
    /// blob arrives.
    pub fn requiring_blob(mut self, counter: u32) -> Self {
        self.required_blob = Some(counter);
        self
    }

    /// Answer the first challenge with `ltBlobRequest(counter)` only.  A
    /// phone holding a newer blob pushes it; otherwise the SORC stays
    /// silent.
    pub fn requesting_blob(mut self, counter: u32) -> Self {
        self.blob_request = Some(counter);
        self
    }

    /// Answer challenges with a response too short to hold `b1` and `b2`.
    pub fn with_corrupt_response(mut self) -> Self {
        self.corrupt_response = true;
        self
    }

    /// Answer challenges with a `b2` that does not prove the key.
    pub fn with_forged_response(mut self) -> Self {
        self.forge_response = true;
        self
    }

    pub fn ignoring_heartbeats(mut self) -> Self {
        self.answer_heartbeats = false;
        self
    }

    /// Leave service grants unanswered; see [`SimulatedSorc::grant_response`].
    pub fn holding_grants(mut self) -> Self {
        self.answer_grants = false;
        self
    }

    pub fn with_grant_reply(mut self, status: ServiceGrantStatus, data: &str) -> Self {
        self.grant_status = status;
        self.grant_data = data.to_string();
        self
    }

    // ── Observation ──────────────────────────────────────────

    pub fn sorc_id(&self) -> SorcId {
        self.sorc_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Every message the phone sent, decrypted.
    pub fn received(&self) -> &[SorcMessage] {
        &self.received
    }

    pub fn received_ids(&self) -> Vec<SorcMessageId> {
        self.received.iter().map(|m| m.id).collect()
    }

    /// Forget the link: handshake, session and partial packages.
    pub fn drop_link(&mut self) {
        self.handshake = None;
        self.session = None;
        self.assembler.reset();
    }

    // ── Traffic ──────────────────────────────────────────────

    /// Accept one frame written by the phone.  Returns the notification
    /// frames the SORC sends back once a whole message has arrived.
    pub fn receive_frame(&mut self, raw: &[u8]) -> Vec<Vec<u8>> {
        let frame = match DataFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("sim: dropping bad frame: {}", e);
                self.assembler.reset();
                return Vec::new();
            }
        };
        let Some(bytes) = self.assembler.push(frame) else {
            return Vec::new();
        };

        let replies = self.handle_bytes(&bytes);
        replies
            .into_iter()
            .flat_map(|reply| self.notify(&reply))
            .collect()
    }

    /// Frames for an unsolicited message, sealed if a session is up.
    pub fn notify(&mut self, message: &SorcMessage) -> Vec<Vec<u8>> {
        let bytes = match &mut self.session {
            Some(ctx) => match ctx.encrypt(&message.to_bytes()) {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!("sim: cannot seal {:?}: {}", message.id, e);
                    return Vec::new();
                }
            },
            None => message.to_bytes(),
        };
        self.frame(&bytes)
    }

    /// Frames of a `ServiceGrantTrigger` for `id`.
    pub fn grant_response(
        &mut self,
        id: ServiceGrantId,
        status: ServiceGrantStatus,
        data: &str,
    ) -> Vec<Vec<u8>> {
        let message = grant_trigger(id, status, data);
        self.notify(&message)
    }

    /// Frame raw bytes at the SORC's MTU.
    pub fn frame(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        match FramePackage::new(bytes, frame_size_for_mtu(usize::from(self.mtu))) {
            Ok(package) => package.frames().iter().map(DataFrame::to_bytes).collect(),
            Err(e) => {
                warn!("sim: cannot frame {} bytes: {}", bytes.len(), e);
                Vec::new()
            }
        }
    }

    fn handle_bytes(&mut self, bytes: &[u8]) -> Vec<SorcMessage> {
        let message = match &mut self.session {
            Some(ctx) => match ctx.decrypt(bytes) {
                Ok(plain) => SorcMessage::from_bytes(&plain),
                Err(e) => {
                    warn!("sim: cannot open phone message: {}", e);
                    return Vec::new();
                }
            },
            None => SorcMessage::from_bytes(bytes),
        };
        debug!("sim: phone sent {:?}", message.id);
        self.received.push(message.clone());

        match message.id {
            SorcMessageId::MtuRequest => {
                vec![SorcMessage::new(SorcMessageId::MtuReceive, vec![self.mtu, 0])]
            }
            SorcMessageId::ChallengePhone => self.answer_challenge(&message.payload),
            SorcMessageId::ChallengePhoneResponse => {
                self.verify_response(&message.payload);
                Vec::new()
            }
            SorcMessageId::LtBlob => {
                self.required_blob = None;
                self.blob_request = None;
                vec![SorcMessage::empty(SorcMessageId::LtAck)]
            }
            SorcMessageId::HeartbeatRequest if self.answer_heartbeats => {
                vec![SorcMessage::empty(SorcMessageId::HeartbeatResponse)]
            }
            SorcMessageId::ServiceGrant if self.answer_grants => {
                let id = match message.payload.as_slice() {
                    [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
                    _ => return Vec::new(),
                };
                vec![grant_trigger(id, self.grant_status, &self.grant_data)]
            }
            _ => Vec::new(),
        }
    }

    fn answer_challenge(&mut self, payload: &[u8]) -> Vec<SorcMessage> {
        if let Some(counter) = self.required_blob {
            let mut reply = vec![0x00];
            reply.extend_from_slice(&counter.to_be_bytes());
            return vec![SorcMessage::new(SorcMessageId::BadChallengeSorcResponse, reply)];
        }
        if let Some(counter) = self.blob_request {
            return vec![SorcMessage::new(
                SorcMessageId::LtBlobRequest,
                counter.to_le_bytes().to_vec(),
            )];
        }
        if self.corrupt_response {
            let reply = vec![0xC0, 0xFF, 0xEE];
            return vec![SorcMessage::new(SorcMessageId::ChallengeSorcResponse, reply)];
        }
        if payload.len() < BLOCK_SIZE {
            return Vec::new();
        }

        let mut b0 = [0u8; BLOCK_SIZE];
        b0.copy_from_slice(&payload[payload.len() - BLOCK_SIZE..]);
        let nc = self.cipher.decrypt_block(&b0);
        let r1 = rotate(&nc);

        let mut nr = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut nr);
        let b1 = self.cipher.encrypt_block(&xor(&nr, &b0));
        let mut b2 = self.cipher.encrypt_block(&xor(&r1, &b1));
        if self.forge_response {
            b2[0] ^= 0xFF;
        }

        self.handshake = Some(Handshake { nc, nr, b2 });
        let mut reply = b1.to_vec();
        reply.extend_from_slice(&b2);
        vec![SorcMessage::new(SorcMessageId::ChallengeSorcResponse, reply)]
    }

    fn verify_response(&mut self, payload: &[u8]) {
        let Some(handshake) = self.handshake.take() else {
            return;
        };
        if payload.len() != BLOCK_SIZE {
            return;
        }
        let mut b3 = [0u8; BLOCK_SIZE];
        b3.copy_from_slice(payload);

        let r6 = xor(&self.cipher.decrypt_block(&b3), &handshake.b2);
        if rotate_inverse(&r6) != handshake.nr {
            warn!("sim: phone response does not match");
            return;
        }
        let key = derive_session_key(&handshake.nr, &handshake.nc);
        self.session = EncryptionContext::new(&key, Direction::ToPhone).ok();
    }
}

fn grant_trigger(id: ServiceGrantId, status: ServiceGrantStatus, data: &str) -> SorcMessage {
    let mut payload = id.to_le_bytes().to_vec();
    payload.push(status as u8);
    payload.extend_from_slice(data.as_bytes());
    SorcMessage::new(SorcMessageId::ServiceGrantTrigger, payload)
}

// ── Link ─────────────────────────────────────────────────────

/// A [`Transport`] whose far end is a [`SimulatedSorc`].
///
/// Writes are parked in an outbox until the caller pumps them.
pub struct SimulatedLink {
    pub sorc: SimulatedSorc,
    outbox: VecDeque<Vec<u8>>,
    connects: Vec<SorcId>,
    disconnects: usize,
    scanning: bool,
    fail_writes: bool,
}

impl SimulatedLink {
    pub fn new(sorc: SimulatedSorc) -> Self {
        Self {
            sorc,
            outbox: VecDeque::new(),
            connects: Vec::new(),
            disconnects: 0,
            scanning: false,
            fail_writes: false,
        }
    }

    /// Next frame written by the stack, oldest first.
    pub fn take_write(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    pub fn pending_writes(&self) -> usize {
        self.outbox.len()
    }

    pub fn connects(&self) -> &[SorcId] {
        &self.connects
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Make every following `write` fail synchronously.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl Transport for SimulatedLink {
    type Error = &'static str;

    fn connect(&mut self, sorc_id: SorcId) {
        self.connects.push(sorc_id);
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.outbox.clear();
        self.sorc.drop_link();
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err("write rejected");
        }
        self.outbox.push_back(data.to_vec());
        Ok(())
    }

    fn set_scanning(&mut self, enabled: bool) {
        self.scanning = enabled;
    }
}
