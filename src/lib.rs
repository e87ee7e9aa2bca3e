//! Phone-side protocol stack for BLE access to vehicle SORC modules.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 SorcManager (public facade)                  │
//! │      discovery · connection · service grant · bluetooth       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SessionManager   heartbeats · bounded request queue          │
//! │  SecurityManager  challenge handshake · AES-CBC + CMAC        │
//! │  TransportManager MTU negotiation · frame packages            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ports: Transport (radio) · Clock · EventSink (telemetry)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The stack performs no I/O of its own.  The radio adapter implements
//! [`ports::Transport`] and feeds completions back through the
//! `SorcManager::handle_*` methods; the owner calls `tick` to drive
//! timers.

#![deny(unused_must_use)]

pub mod adapters;
pub mod bounded_queue;
pub mod change;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod events;
pub mod lease;
pub mod manager;
pub mod ports;
pub mod protocol;
pub mod security;
pub mod session;
pub mod sim;
pub mod timer;
pub mod transport;

pub use config::AccessConfig;
pub use error::{Error, Result};
pub use lease::{LeaseToken, LeaseTokenBlob, SorcId};
pub use manager::SorcManager;
