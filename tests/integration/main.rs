//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises the full `SorcManager` stack against the
//! in-process SORC peer.  No radio is involved.

mod connection_tests;
mod discovery_tests;
mod mock_radio;
mod service_grant_tests;
