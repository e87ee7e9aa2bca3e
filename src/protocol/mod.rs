//! Wire-level protocol: MTU frames and the messages they carry.
//!
//! ```text
//!   SorcMessage ──(encrypt once authenticated)──▶ bytes
//!        bytes ──FramePackage──▶ DataFrame … DataFrame ──▶ radio
//! ```

pub mod frame;
pub mod message;

pub use frame::{DEFAULT_MTU, DataFrame, FrameAssembler, FramePackage, FrameType};
pub use message::{SorcMessage, SorcMessageId};
