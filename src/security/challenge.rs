//! Mutual challenge-response handshake.
//!
//! Phone and SORC share `k_auth` (the lease token's access key) and prove
//! knowledge of it without sending it.  Each side contributes a nonce; the
//! session key is built from both.
//!
//! ```text
//!   phone                                         SORC
//!   nc ← random
//!   b0 = E(nc)            ── challengePhone(b0) ──▶
//!                                                 r1 = P(D(b0)),  nr ← random
//!                                                 b1 = E(nr ⊕ b0)
//!                         ◀─ sorcResponse(b1,b2) ─ b2 = E(r1 ⊕ b1)
//!   P⁻¹(D(b2) ⊕ b1) == nc ?
//!   nr = D(b1) ⊕ b0
//!   b3 = E(P(nr) ⊕ b2)    ── phoneResponse(b3) ──▶ P⁻¹(D(b3) ⊕ b2) == nr ?
//!
//!   key = nr[0..4] ‖ nc[0..4] ‖ nr[12..16] ‖ nc[12..16]
//! ```
//!
//! `E`/`D` are single-block AES-128 with `k_auth`; `P` moves the last byte
//! of a block to the front.

use log::{debug, warn};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::crypto::{BLOCK_SIZE, Block, BlockCipher, xor};
use crate::error::ChallengeError;
use crate::lease::{LeaseToken, SorcId};
use crate::protocol::message::{
    SorcMessage, SorcMessageId, challenge_phone_payload, parse_bad_challenge_counter,
    parse_sorc_response,
};

/// A derived 128-bit session key, wiped on drop.
pub type SessionKey = Zeroizing<Block>;

// ── Permutation and key schedule ─────────────────────────────

/// `P`: last byte to the front.
pub fn rotate(block: &Block) -> Block {
    let mut out = *block;
    out.rotate_right(1);
    out
}

/// `P⁻¹`: first byte to the end.
pub fn rotate_inverse(block: &Block) -> Block {
    let mut out = *block;
    out.rotate_left(1);
    out
}

/// `nr[0..4] ‖ nc[0..4] ‖ nr[12..16] ‖ nc[12..16]`
pub fn derive_session_key(nr: &Block, nc: &Block) -> SessionKey {
    let mut key = Zeroizing::new([0u8; BLOCK_SIZE]);
    key[0..4].copy_from_slice(&nr[0..4]);
    key[4..8].copy_from_slice(&nc[0..4]);
    key[8..12].copy_from_slice(&nr[12..16]);
    key[12..16].copy_from_slice(&nc[12..16]);
    key
}

// ── Challenger ───────────────────────────────────────────────

/// What the security layer must do after feeding the challenger a message.
#[derive(Debug)]
pub enum ChallengeStep {
    /// Send this message and keep waiting.
    Send(SorcMessage),
    /// Send the final response; the session key is ready.
    Finished {
        response: SorcMessage,
        session_key: SessionKey,
    },
    /// The SORC wants a lease token blob newer than `latest_counter`.
    NeedsBlob { latest_counter: Option<u32> },
    /// The SORC failed to prove the key; send the rejection and abort.
    Rejected {
        response: SorcMessage,
        error: ChallengeError,
    },
}

/// Phone side of one handshake attempt.
pub struct Challenger {
    cipher: BlockCipher,
    lease_id: String,
    sorc_id: SorcId,
    lease_token_id: String,
    nc: Zeroizing<Block>,
    b0: Block,
}

impl Challenger {
    /// Seed the cipher from the token's access key with a random nonce.
    pub fn new(token: &LeaseToken) -> Result<Self, ChallengeError> {
        let mut nc = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut nc);
        Self::with_nonce(token, nc)
    }

    /// As [`Challenger::new`] with a caller-chosen nonce.
    pub fn with_nonce(token: &LeaseToken, nc: Block) -> Result<Self, ChallengeError> {
        let key = Zeroizing::new(
            token
                .access_key_bytes()
                .map_err(|_| ChallengeError::AesCryptoNotInitialised)?,
        );
        let cipher =
            BlockCipher::new(key.as_slice()).map_err(|_| ChallengeError::AesCryptoNotInitialised)?;
        Ok(Self {
            cipher,
            lease_id: token.lease_id().to_string(),
            sorc_id: token.sorc_id(),
            lease_token_id: token.id().to_string(),
            nc: Zeroizing::new(nc),
            b0: [0; BLOCK_SIZE],
        })
    }

    /// Build the opening `challengePhone` message.
    pub fn begin(&mut self) -> SorcMessage {
        self.b0 = self.cipher.encrypt_block(&self.nc);
        debug!("security: challenging {}", self.sorc_id);
        SorcMessage::new(
            SorcMessageId::ChallengePhone,
            challenge_phone_payload(&self.lease_id, &self.sorc_id, &self.lease_token_id, &self.b0),
        )
    }

    /// Start over with a fresh nonce.
    pub fn restart(&mut self) -> SorcMessage {
        OsRng.fill_bytes(self.nc.as_mut_slice());
        self.begin()
    }

    /// Feed one SORC message received during the handshake.
    pub fn handle(&mut self, message: &SorcMessage) -> Result<ChallengeStep, ChallengeError> {
        match message.id {
            SorcMessageId::LtAck => Ok(ChallengeStep::Send(self.restart())),
            SorcMessageId::BadChallengeSorcResponse => Ok(ChallengeStep::NeedsBlob {
                latest_counter: parse_bad_challenge_counter(&message.payload),
            }),
            SorcMessageId::ChallengeSorcResponse => self.continue_challenge(&message.payload),
            other => {
                warn!("security: {:?} is not a challenge message", other);
                Err(ChallengeError::NoChallengeMessage)
            }
        }
    }

    fn continue_challenge(&mut self, payload: &[u8]) -> Result<ChallengeStep, ChallengeError> {
        let (b1, b2) = parse_sorc_response(payload)?;

        let r3 = xor(&self.cipher.decrypt_block(&b2), &b1);
        if rotate_inverse(&r3) != *self.nc {
            warn!("security: SORC response does not match our nonce");
            return Ok(ChallengeStep::Rejected {
                response: SorcMessage::empty(SorcMessageId::BadChallengePhoneResponse),
                error: ChallengeError::ResponseDoNotMatch,
            });
        }

        let nr = Zeroizing::new(xor(&self.cipher.decrypt_block(&b1), &self.b0));
        let r5 = rotate(&nr);
        let b3 = self.cipher.encrypt_block(&xor(&r5, &b2));

        Ok(ChallengeStep::Finished {
            response: SorcMessage::new(SorcMessageId::ChallengePhoneResponse, b3.to_vec()),
            session_key: derive_session_key(&nr, &self.nc),
        })
    }
}

impl core::fmt::Debug for Challenger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Challenger")
            .field("sorc_id", &self.sorc_id)
            .finish_non_exhaustive()
    }
}
