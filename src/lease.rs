//! Lease credentials.
//!
//! A [`LeaseToken`] grants access to one SORC and carries the pre-shared
//! access key that seeds the handshake cipher.  A [`LeaseTokenBlob`] is the
//! server-signed freshness proof pushed to the SORC when it asks for one.
//!
//! Both arrive from the backend as JSON; [`LeaseToken::from_json`] and
//! [`LeaseTokenBlob::from_json`] parse that shape at the application edge.

use core::fmt;

use anyhow::{Context, bail};
use serde::Deserialize;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::LeaseError;

/// 128-bit SORC identifier.
pub type SorcId = Uuid;

/// Access key length in bytes (AES-128).
pub const ACCESS_KEY_SIZE: usize = 16;

// ── LeaseToken ───────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct LeaseToken {
    id: String,
    lease_id: String,
    sorc_id: SorcId,
    sorc_access_key: String,
}

impl LeaseToken {
    /// Build a token; the access key must be 32 hex digits.
    pub fn new(
        id: impl Into<String>,
        lease_id: impl Into<String>,
        sorc_id: SorcId,
        sorc_access_key: impl Into<String>,
    ) -> Result<Self, LeaseError> {
        let sorc_access_key = sorc_access_key.into();
        if sorc_access_key.is_empty() {
            return Err(LeaseError::EmptyAccessKey);
        }
        decode_access_key(&sorc_access_key)?;
        Ok(Self {
            id: id.into(),
            lease_id: lease_id.into(),
            sorc_id,
            sorc_access_key,
        })
    }

    /// Parse the backend lease token document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let doc: LeaseTokenDocument =
            serde_json::from_str(json).context("lease token is not valid JSON")?;
        let token = Self::new(
            doc.lease_token_id.to_string(),
            doc.lease_id.to_string(),
            doc.sorc_id,
            doc.sorc_access_key,
        )
        .context("lease token carries an unusable access key")?;
        Ok(token)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn sorc_id(&self) -> SorcId {
        self.sorc_id
    }

    pub fn sorc_access_key(&self) -> &str {
        &self.sorc_access_key
    }

    /// The access key as AES key bytes.
    pub fn access_key_bytes(&self) -> Result<[u8; ACCESS_KEY_SIZE], LeaseError> {
        decode_access_key(&self.sorc_access_key)
    }
}

impl Drop for LeaseToken {
    fn drop(&mut self) {
        self.sorc_access_key.zeroize();
    }
}

impl fmt::Debug for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseToken")
            .field("id", &self.id)
            .field("lease_id", &self.lease_id)
            .field("sorc_id", &self.sorc_id)
            .field("sorc_access_key", &"<redacted>")
            .finish()
    }
}

fn decode_access_key(hex_key: &str) -> Result<[u8; ACCESS_KEY_SIZE], LeaseError> {
    if hex_key.is_empty() {
        return Err(LeaseError::EmptyAccessKey);
    }
    let mut key = [0u8; ACCESS_KEY_SIZE];
    hex::decode_to_slice(hex_key, &mut key).map_err(|_| LeaseError::InvalidAccessKey)?;
    Ok(key)
}

// ── LeaseTokenBlob ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseTokenBlob {
    pub message_counter: u32,
    /// Base64-encoded blob as delivered by the backend.
    pub data: String,
}

impl LeaseTokenBlob {
    pub fn new(message_counter: u32, data: impl Into<String>) -> Result<Self, LeaseError> {
        let data = data.into();
        if data.is_empty() {
            return Err(LeaseError::InvalidBlob);
        }
        Ok(Self {
            message_counter,
            data,
        })
    }

    /// Parse the backend blob document (`blobMessageCounter` is a string).
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let doc: LeaseTokenBlobDocument =
            serde_json::from_str(json).context("lease token blob is not valid JSON")?;
        let message_counter: u32 = doc
            .blob_message_counter
            .trim()
            .parse()
            .with_context(|| format!("blob counter {:?} is not a number", doc.blob_message_counter))?;
        if doc.blob.is_empty() {
            bail!("blob for SORC {} is empty", doc.sorc_id);
        }
        Ok(Self {
            message_counter,
            data: doc.blob,
        })
    }
}

// ── Wire documents ───────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseTokenDocument {
    lease_token_id: Uuid,
    lease_id: Uuid,
    sorc_id: Uuid,
    sorc_access_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseTokenBlobDocument {
    sorc_id: Uuid,
    blob: String,
    blob_message_counter: String,
}
