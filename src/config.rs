//! Access stack configuration.
//!
//! All tunable timings and sizes for the stack, plus the GATT identifiers
//! the radio adapter needs to find the SORC service.  Values can be
//! overridden from a persisted postcard blob or JSON.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::{Uuid, uuid};

use crate::error::ConfigError;
use crate::protocol::frame::HEADER_SIZE;

/// Core stack configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    // --- Session liveness ---
    /// Heartbeat send period (milliseconds)
    pub heartbeat_interval_ms: u32,
    /// Silence after which the session is dropped (milliseconds)
    pub heartbeat_timeout_ms: u32,

    // --- Request queue ---
    /// Pending messages (service grants + heartbeats) held before rejecting
    pub max_enqueued_messages: u16,

    // --- Framing ---
    /// MTU assumed until the SORC answers the MTU request
    pub default_mtu: u16,

    // --- GATT ---
    pub service_id: Uuid,
    pub notify_characteristic_id: Uuid,
    pub write_characteristic_id: Uuid,

    // --- Discovery ---
    /// Age after which an unseen SORC is dropped (milliseconds)
    pub sorc_outdated_duration_ms: u32,
    /// Period of the outdated-SORC sweep (milliseconds)
    pub remove_outdated_sorcs_interval_ms: u32,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            // Liveness
            heartbeat_interval_ms: 2_000,
            heartbeat_timeout_ms: 6_000,

            // Queue
            max_enqueued_messages: 10,

            // Framing
            default_mtu: 20,

            // GATT
            service_id: uuid!("d1cf0603-b501-4569-a4b9-e47ad3f628a5"),
            notify_characteristic_id: uuid!("d1d7a6b6-457e-458a-b237-a9df99b3d98b"),
            write_characteristic_id: uuid!("c8e58f23-9417-41c6-97a8-70f6b2c8cab9"),

            // Discovery
            sorc_outdated_duration_ms: 5_000,
            remove_outdated_sorcs_interval_ms: 2_000,
        }
    }
}

impl AccessConfig {
    /// Reject values the stack cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("heartbeat_interval_ms"));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::ValidationFailed("heartbeat_timeout_ms"));
        }
        if self.max_enqueued_messages == 0 {
            return Err(ConfigError::ValidationFailed("max_enqueued_messages"));
        }
        if usize::from(self.default_mtu) <= HEADER_SIZE {
            return Err(ConfigError::ValidationFailed("default_mtu"));
        }
        if self.sorc_outdated_duration_ms == 0 {
            return Err(ConfigError::ValidationFailed("sorc_outdated_duration_ms"));
        }
        if self.remove_outdated_sorcs_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "remove_outdated_sorcs_interval_ms",
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.into())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.into())
    }

    pub fn sorc_outdated_duration(&self) -> Duration {
        Duration::from_millis(self.sorc_outdated_duration_ms.into())
    }

    pub fn remove_outdated_sorcs_interval(&self) -> Duration {
        Duration::from_millis(self.remove_outdated_sorcs_interval_ms.into())
    }

    /// Compact persisted form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Corrupted)
    }

    /// Decode and validate a persisted blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }
}
