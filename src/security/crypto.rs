//! Session encryption: AES-128-CBC with an IV chained across messages,
//! authenticated by a truncated AES-CMAC.
//!
//! Envelope of one encrypted message:
//!
//! ```text
//! ┌──────────────────────── CBC(key, iv) ───────────────────────┐
//! │ Header (1B)          │ SorcMessage bytes   │ Zero padding    │ MAC (8B)
//! │ padding<<4 | dir     │ id ‖ payload        │ 0..15 bytes     │ CMAC(key, iv ‖ ct)[8..16]
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each direction keeps its own rolling IV: after every message the IV
//! becomes the last ciphertext block.  Nothing is reset between messages;
//! only a fresh handshake produces a fresh [`EncryptionContext`].

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use cmac::{Cmac, Mac};
use log::{debug, warn};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::protocol::message::SorcMessage;

// ── Constants ────────────────────────────────────────────────

pub const BLOCK_SIZE: usize = 16;
pub const MAC_SIZE: usize = 8;

/// One AES block.
pub type Block = [u8; BLOCK_SIZE];

// ── Block cipher ─────────────────────────────────────────────

/// AES-128 single-block operations.
#[derive(Clone)]
pub struct BlockCipher {
    aes: Aes128,
}

impl BlockCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let aes = Aes128::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { aes })
    }

    pub fn encrypt_block(&self, input: &Block) -> Block {
        let mut block = aes::Block::from(*input);
        self.aes.encrypt_block(&mut block);
        to_array(&block)
    }

    pub fn decrypt_block(&self, input: &Block) -> Block {
        let mut block = aes::Block::from(*input);
        self.aes.decrypt_block(&mut block);
        to_array(&block)
    }
}

fn to_array(block: &aes::Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(block.as_slice());
    out
}

pub fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}

// ── Direction header ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    ToSorc = 0x00,
    ToPhone = 0x01,
}

/// Zero bytes needed so that header plus message fill whole blocks.
pub fn padding_len(message_len: usize) -> usize {
    (BLOCK_SIZE - (message_len + 1) % BLOCK_SIZE) % BLOCK_SIZE
}

// ── Encryption context ───────────────────────────────────────

/// Session key plus the two rolling IVs, owned by one session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionContext {
    key: Block,
    encrypt_iv: Block,
    decrypt_iv: Block,
    #[zeroize(skip)]
    outgoing: Direction,
    #[zeroize(skip)]
    cipher: BlockCipher,
}

impl EncryptionContext {
    /// Both IVs start at zero.
    pub fn new(key: &Block, outgoing: Direction) -> Result<Self, CryptoError> {
        Ok(Self {
            key: *key,
            encrypt_iv: [0; BLOCK_SIZE],
            decrypt_iv: [0; BLOCK_SIZE],
            outgoing,
            cipher: BlockCipher::new(key)?,
        })
    }

    /// Encrypt and MAC one message, advancing the encrypt IV.
    pub fn encrypt(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let padding = padding_len(message.len());
        let mut plain = Vec::with_capacity(1 + message.len() + padding);
        plain.push(((padding as u8) << 4) | self.outgoing as u8);
        plain.extend_from_slice(message);
        plain.resize(plain.len() + padding, 0);

        let mut chain = self.encrypt_iv;
        let mut out = Vec::with_capacity(plain.len() + MAC_SIZE);
        for chunk in plain.chunks_exact(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            chain = self.cipher.encrypt_block(&xor(&block, &chain));
            out.extend_from_slice(&chain);
        }
        plain.zeroize();

        let mac = self.short_mac(&self.encrypt_iv, &out)?;
        out.extend_from_slice(&mac);
        self.encrypt_iv = chain;
        Ok(out)
    }

    /// Verify and decrypt one message, advancing the decrypt IV.
    ///
    /// On any failure the IV is left untouched.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() <= MAC_SIZE {
            return Err(CryptoError::InvalidLength);
        }
        let (ciphertext, mac) = data.split_at(data.len() - MAC_SIZE);
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidLength);
        }

        let expected = self.short_mac(&self.decrypt_iv, ciphertext)?;
        if !bool::from(expected[..].ct_eq(mac)) {
            return Err(CryptoError::MacMismatch);
        }

        let mut chain = self.decrypt_iv;
        let mut plain = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            plain.extend_from_slice(&xor(&self.cipher.decrypt_block(&block), &chain));
            chain = block;
        }
        self.decrypt_iv = chain;

        let header = plain[0];
        let padding = usize::from(header >> 4);
        let mut body = plain.split_off(1);
        plain.zeroize();

        let trailing_zeros = body.iter().rev().take_while(|&&b| b == 0).count();
        body.truncate(body.len() - padding.min(trailing_zeros));
        Ok(body)
    }

    fn short_mac(&self, iv: &Block, ciphertext: &[u8]) -> Result<[u8; MAC_SIZE], CryptoError> {
        let mut mac =
            <Cmac<Aes128> as Mac>::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKey)?;
        mac.update(iv);
        mac.update(ciphertext);
        let full = mac.finalize().into_bytes();
        let mut short = [0u8; MAC_SIZE];
        short.copy_from_slice(&full[BLOCK_SIZE - MAC_SIZE..]);
        Ok(short)
    }
}

impl core::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}

// ── Cipher state ─────────────────────────────────────────────

/// Message protection in force on a connection.
///
/// Starts as a passthrough; switches one way to `Authenticated` when the
/// handshake yields a session key.
#[derive(Debug, Default)]
pub enum CipherState {
    #[default]
    Unauthenticated,
    Authenticated(EncryptionContext),
}

impl CipherState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn encrypt_message(&mut self, message: &SorcMessage) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::Unauthenticated => Ok(message.to_bytes()),
            Self::Authenticated(ctx) => ctx.encrypt(&message.to_bytes()),
        }
    }

    /// Decode received bytes; failures yield the invalid sentinel.
    pub fn decrypt_message(&mut self, data: &[u8]) -> SorcMessage {
        match self {
            Self::Unauthenticated => SorcMessage::from_bytes(data),
            Self::Authenticated(ctx) => match ctx.decrypt(data) {
                Ok(plain) => SorcMessage::from_bytes(&plain),
                Err(e) => {
                    warn!("security: dropping {} received bytes: {}", data.len(), e);
                    SorcMessage::not_valid()
                }
            },
        }
    }

    pub fn reset(&mut self) {
        if self.is_authenticated() {
            debug!("security: discarding session key");
        }
        *self = Self::Unauthenticated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{ServiceGrantResponse, ServiceGrantStatus, SorcMessageId};

    fn key(hex_key: &str) -> Block {
        let mut k = [0u8; BLOCK_SIZE];
        hex::decode_to_slice(hex_key, &mut k).unwrap();
        k
    }

    fn pair(k: &Block) -> (EncryptionContext, EncryptionContext) {
        (
            EncryptionContext::new(k, Direction::ToSorc).unwrap(),
            EncryptionContext::new(k, Direction::ToPhone).unwrap(),
        )
    }

    #[test]
    fn decrypts_recorded_service_grant_trigger() {
        let mut state = CipherState::Authenticated(
            EncryptionContext::new(&key("A9BA14A150209FE230E71A2B780F0645"), Direction::ToSorc)
                .unwrap(),
        );
        let data = hex::decode("D37D3692BEB0F2DE36D875F9BB4CF300F5F954836254BFAF").unwrap();
        let message = state.decrypt_message(&data);
        assert_eq!(message.id, SorcMessageId::ServiceGrantTrigger);

        let sorc = uuid::Uuid::nil();
        let response = ServiceGrantResponse::parse(sorc, &message.payload).unwrap();
        assert_eq!(response.service_grant_id, 3);
        assert_eq!(response.status, ServiceGrantStatus::Success);
        assert_eq!(response.response_data, "LOCKED");
    }

    #[test]
    fn short_input_yields_sentinel() {
        let mut state = CipherState::Authenticated(
            EncryptionContext::new(&key("00BA14A150209FE230E71A2B780F0645"), Direction::ToSorc)
                .unwrap(),
        );
        let message = state.decrypt_message(&[0x30, 0x02, 0x00, 0x00]);
        assert_eq!(message.id, SorcMessageId::NotValid);
    }

    #[test]
    fn passthrough_before_authentication() {
        let mut state = CipherState::Unauthenticated;
        let message = state.decrypt_message(&[0x07, 0x9B, 0x00]);
        assert_eq!(message.id, SorcMessageId::MtuReceive);
        assert_eq!(message.payload, [0x9B, 0x00]);
        assert_eq!(state.encrypt_message(&message).unwrap(), [0x07, 0x9B, 0x00]);
    }

    #[test]
    fn padding_is_minimal() {
        assert_eq!(padding_len(15), 0);
        assert_eq!(padding_len(14), 1);
        assert_eq!(padding_len(16), 15);
        assert_eq!(padding_len(0), 15);
    }

    #[test]
    fn rolling_iv_chains_across_messages() {
        let k = key("A9BA14A150209FE230E71A2B780F0645");
        let (mut phone, mut sorc) = pair(&k);

        let first = phone.encrypt(&[0x0C]).unwrap();
        let second = phone.encrypt(&[0x0C]).unwrap();
        assert_ne!(first, second, "same plaintext must not repeat under a rolled IV");
        assert_eq!(first.len(), BLOCK_SIZE + MAC_SIZE);

        assert_eq!(sorc.decrypt(&first).unwrap(), [0x0C]);
        assert_eq!(sorc.decrypt(&second).unwrap(), [0x0C]);
    }

    #[test]
    fn out_of_order_message_fails_mac() {
        let k = key("A9BA14A150209FE230E71A2B780F0645");
        let (mut phone, mut sorc) = pair(&k);
        let _first = phone.encrypt(&[1]).unwrap();
        let second = phone.encrypt(&[2]).unwrap();
        assert_eq!(sorc.decrypt(&second), Err(CryptoError::MacMismatch));
    }

    #[test]
    fn tampered_ciphertext_is_rejected_without_advancing() {
        let k = key("A9BA14A150209FE230E71A2B780F0645");
        let (mut phone, mut sorc) = pair(&k);
        let good = phone.encrypt(&[0x20, 0x02, 0x00]).unwrap();
        let mut bad = good.clone();
        bad[3] ^= 0x01;
        assert_eq!(sorc.decrypt(&bad), Err(CryptoError::MacMismatch));
        assert_eq!(sorc.decrypt(&good).unwrap(), [0x20, 0x02, 0x00]);
    }

    #[test]
    fn trailing_zero_payload_bytes_survive() {
        let k = key("A9BA14A150209FE230E71A2B780F0645");
        let (mut phone, mut sorc) = pair(&k);
        let message = [0x30, 0x02, 0x00, 0x00, 0x00];
        let sealed = phone.encrypt(&message).unwrap();
        assert_eq!(sorc.decrypt(&sealed).unwrap(), message);
    }

    #[test]
    fn misaligned_ciphertext_is_rejected() {
        let k = key("A9BA14A150209FE230E71A2B780F0645");
        let (_, mut sorc) = pair(&k);
        assert_eq!(sorc.decrypt(&[0u8; 20]), Err(CryptoError::InvalidLength));
        assert_eq!(sorc.decrypt(&[0u8; 8]), Err(CryptoError::InvalidLength));
    }

    #[test]
    fn bad_key_length_is_an_error() {
        assert!(BlockCipher::new(&[0; 16]).is_ok());
        assert!(BlockCipher::new(&[0; 5]).is_err());
    }
}
