//! Unified error types for the access stack.
//!
//! Each layer owns a small `Copy` error enum; all of them convert into the
//! crate-wide [`Error`] so callers that do not care about the layer can use
//! [`Result`] and `?` uniformly.
//!
//! Note that connection-level failures (link lost, handshake rejected) are
//! *not* errors in this sense: they surface as `disconnected` transitions on
//! the change streams.  These types describe failures of a single operation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A frame could not be encoded or decoded.
    Frame(FrameError),
    /// The transport layer refused or failed a send/receive.
    Transport(TransportError),
    /// The secure channel could not protect or recover a message.
    Secure(SecureError),
    /// The challenge-response handshake failed.
    Challenge(ChallengeError),
    /// Session encryption or authentication failed.
    Crypto(CryptoError),
    /// A bounded queue rejected an element.
    Queue(QueueError),
    /// Lease credentials are unusable.
    Lease(LeaseError),
    /// Configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Secure(e) => write!(f, "security: {e}"),
            Self::Challenge(e) => write!(f, "challenge: {e}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::Queue(e) => write!(f, "queue: {e}"),
            Self::Lease(e) => write!(f, "lease: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Frame errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame size of zero leaves no room for payload.
    EmptyFrameSize,
    /// Message length does not fit the 16-bit length field.
    MessageTooLarge,
    /// Fewer bytes than a frame header.
    Truncated,
    /// High nibble of the header is not a known frame type.
    UnknownType,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFrameSize => write!(f, "frame size must be non-zero"),
            Self::MessageTooLarge => write!(f, "message exceeds 65535 bytes"),
            Self::Truncated => write!(f, "frame shorter than header"),
            Self::UnknownType => write!(f, "unknown frame type"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// A package is already being sent or received.
    SendingInProgress,
    /// No connection to a SORC.
    NotConnected,
    /// The radio reported a failed characteristic write.
    WriteFailed,
    /// The radio reported a failed notification read.
    ReceiveFailed,
    /// A received frame could not be parsed.
    InvalidFrame,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendingInProgress => write!(f, "sending in progress"),
            Self::NotConnected => write!(f, "not connected"),
            Self::WriteFailed => write!(f, "characteristic write failed"),
            Self::ReceiveFailed => write!(f, "notification receive failed"),
            Self::InvalidFrame => write!(f, "invalid frame"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<FrameError> for TransportError {
    fn from(_: FrameError) -> Self {
        Self::InvalidFrame
    }
}

// ---------------------------------------------------------------------------
// Secure channel errors
// ---------------------------------------------------------------------------

/// Per-message failures of the secure channel once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureError {
    /// Received bytes failed MAC verification or decryption.
    DecryptionFailed,
    /// An outgoing message could not be encrypted.
    EncryptionFailed,
    /// The transport below failed the send or receive.
    Transport(TransportError),
}

impl fmt::Display for SecureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::EncryptionFailed => write!(f, "encryption failed"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SecureError {}

impl From<SecureError> for Error {
    fn from(e: SecureError) -> Self {
        Self::Secure(e)
    }
}

impl From<TransportError> for SecureError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Challenge errors
// ---------------------------------------------------------------------------

/// Handshake failures.  Mismatches are authentication failures ("wrong
/// key"), distinct from AES primitive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeError {
    /// `P⁻¹(r3)` did not reproduce our nonce.
    ResponseDoNotMatch,
    /// The SORC rejected our response.
    ResponseWasNotAccepted,
    /// The SORC response is too short to contain `b1` and `b2`.
    ResponseIsCorrupt,
    /// The access key could not seed the cipher.
    AesCryptoNotInitialised,
    AesEncryptionFailed,
    AesDecryptionFailed,
    /// A message arrived that has no place in the handshake.
    NoChallengeMessage,
}

impl fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseDoNotMatch => write!(f, "challenge response does not match"),
            Self::ResponseWasNotAccepted => write!(f, "challenge response was not accepted"),
            Self::ResponseIsCorrupt => write!(f, "challenge response is corrupt"),
            Self::AesCryptoNotInitialised => write!(f, "AES cipher not initialised"),
            Self::AesEncryptionFailed => write!(f, "AES encryption failed"),
            Self::AesDecryptionFailed => write!(f, "AES decryption failed"),
            Self::NoChallengeMessage => write!(f, "not a challenge message"),
        }
    }
}

impl std::error::Error for ChallengeError {}

impl From<ChallengeError> for Error {
    fn from(e: ChallengeError) -> Self {
        Self::Challenge(e)
    }
}

// ---------------------------------------------------------------------------
// Crypto errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material is not a 128-bit AES key.
    InvalidKey,
    /// The truncated CMAC did not verify.
    MacMismatch,
    /// Ciphertext is not a whole number of blocks plus a MAC.
    InvalidLength,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key"),
            Self::MacMismatch => write!(f, "MAC mismatch"),
            Self::InvalidLength => write!(f, "invalid ciphertext length"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ---------------------------------------------------------------------------
// Queue errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    MaximumElementsReached,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaximumElementsReached => write!(f, "maximum elements reached"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

// ---------------------------------------------------------------------------
// Lease errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseError {
    /// The lease token carries no access key.
    EmptyAccessKey,
    /// The access key is not a 32-digit hex string.
    InvalidAccessKey,
    /// The blob is empty or not valid base64.
    InvalidBlob,
}

impl fmt::Display for LeaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyAccessKey => write!(f, "access key is empty"),
            Self::InvalidAccessKey => write!(f, "access key is not 128-bit hex"),
            Self::InvalidBlob => write!(f, "lease token blob is invalid"),
        }
    }
}

impl std::error::Error for LeaseError {}

impl From<LeaseError> for Error {
    fn from(e: LeaseError) -> Self {
        Self::Lease(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation; the message names it.
    ValidationFailed(&'static str),
    /// A persisted blob could not be decoded.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Corrupted => write!(f, "config corrupted"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
