//! Security layer: handshake, session crypto and the manager that ties
//! them to a transport connection.

pub mod challenge;
pub mod crypto;
pub mod manager;

pub use challenge::{ChallengeStep, Challenger, SessionKey};
pub use crypto::{CipherState, Direction, EncryptionContext};
pub use manager::{SecureEvent, SecurityManager};
