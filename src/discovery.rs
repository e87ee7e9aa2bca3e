//! SORC discovery from advertisement reports.
//!
//! ```text
//!   advertisement ──▶ sorc_discovered ──▶ discovered / rediscovered
//!   sweep timer   ──▶ remove_outdated ──▶ lost {ids}
//!   bluetooth off ──▶ reset
//! ```
//!
//! Reports are only accepted while discovery is enabled.  The SORC the
//! phone is connected to never ages out.

use core::time::Duration;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use uuid::Uuid;

use crate::change::{Change, ChangeAction, ChangeSubject};
use crate::config::AccessConfig;
use crate::lease::SorcId;
use crate::timer::RepeatingTimer;

/// Decode the SORC id carried in advertisement manufacturer data.
///
/// Exactly sixteen bytes, most significant first.
pub fn sorc_id_from_manufacturer_data(data: &[u8]) -> Option<SorcId> {
    if data.len() != 16 {
        return None;
    }
    Uuid::from_slice(data).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SorcInfo {
    pub sorc_id: SorcId,
    /// Clock time of the latest advertisement.
    pub discovered_at: Duration,
    pub rssi: i16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryState {
    pub discovered_sorcs: BTreeMap<SorcId, SorcInfo>,
    pub discovery_enabled: bool,
}

impl DiscoveryState {
    pub fn contains(&self, sorc_id: &SorcId) -> bool {
        self.discovered_sorcs.contains_key(sorc_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryAction {
    Initial,
    Discovered { sorc_id: SorcId },
    /// Seen again; RSSI or timestamp changed.
    Rediscovered { sorc_id: SorcId },
    /// Not seen within the outdated window.
    Lost { sorc_ids: BTreeSet<SorcId> },
    /// Removed because the caller disconnected from it.
    Disconnect { sorc_id: SorcId },
    /// Removed because the link to it ended on its own.
    Disconnected { sorc_id: SorcId },
    Reset,
    StartDiscovery,
    StopDiscovery,
}

impl ChangeAction for DiscoveryAction {
    fn initial() -> Self {
        Self::Initial
    }
}

pub type DiscoveryChange = Change<DiscoveryState, DiscoveryAction>;

pub struct DiscoveryManager {
    discovery: ChangeSubject<DiscoveryState, DiscoveryAction>,
    sweep_timer: RepeatingTimer,
    outdated_after: Duration,
}

impl DiscoveryManager {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            discovery: ChangeSubject::new(DiscoveryState::default()),
            sweep_timer: RepeatingTimer::new(config.remove_outdated_sorcs_interval()),
            outdated_after: config.sorc_outdated_duration(),
        }
    }

    pub fn state(&self) -> &DiscoveryState {
        self.discovery.state()
    }

    pub fn discovery_change(&mut self) -> &mut ChangeSubject<DiscoveryState, DiscoveryAction> {
        &mut self.discovery
    }

    /// Returns `false` if discovery was already on.
    pub fn start_discovery(&mut self, now: Duration) -> bool {
        if self.state().discovery_enabled {
            return false;
        }
        let mut state = self.state().clone();
        state.discovery_enabled = true;
        self.sweep_timer.start(now);
        self.discovery.publish(state, DiscoveryAction::StartDiscovery);
        true
    }

    /// Returns `false` if discovery was already off.  Known SORCs are kept.
    pub fn stop_discovery(&mut self) -> bool {
        if !self.state().discovery_enabled {
            return false;
        }
        let mut state = self.state().clone();
        state.discovery_enabled = false;
        self.sweep_timer.stop();
        self.discovery.publish(state, DiscoveryAction::StopDiscovery);
        true
    }

    pub fn sorc_discovered(&mut self, sorc_id: SorcId, rssi: i16, now: Duration) {
        if !self.state().discovery_enabled {
            return;
        }
        let mut state = self.state().clone();
        let info = SorcInfo {
            sorc_id,
            discovered_at: now,
            rssi,
        };
        let action = match state.discovered_sorcs.insert(sorc_id, info) {
            Some(_) => DiscoveryAction::Rediscovered { sorc_id },
            None => {
                info!("discovery: found {} (rssi {})", sorc_id, rssi);
                DiscoveryAction::Discovered { sorc_id }
            }
        };
        self.discovery.publish(state, action);
    }

    /// Drop SORCs not seen for the outdated window, except `connected`.
    pub fn remove_outdated(&mut self, now: Duration, connected: Option<SorcId>) {
        let mut state = self.state().clone();
        let lost: BTreeSet<SorcId> = state
            .discovered_sorcs
            .values()
            .filter(|info| now.saturating_sub(info.discovered_at) > self.outdated_after)
            .map(|info| info.sorc_id)
            .filter(|id| Some(*id) != connected)
            .collect();
        if lost.is_empty() {
            return;
        }
        debug!("discovery: lost {} SORC(s)", lost.len());
        state.discovered_sorcs.retain(|id, _| !lost.contains(id));
        self.discovery
            .publish(state, DiscoveryAction::Lost { sorc_ids: lost });
    }

    /// Forget a SORC whose connection ended.  `requested` tells whether
    /// the caller asked for the disconnect.
    pub fn remove(&mut self, sorc_id: SorcId, requested: bool) {
        if !self.state().contains(&sorc_id) {
            return;
        }
        let mut state = self.state().clone();
        state.discovered_sorcs.remove(&sorc_id);
        let action = if requested {
            DiscoveryAction::Disconnect { sorc_id }
        } else {
            DiscoveryAction::Disconnected { sorc_id }
        };
        self.discovery.publish(state, action);
    }

    /// Clear every known SORC; discovery stays enabled or disabled.
    pub fn reset(&mut self) {
        let state = DiscoveryState {
            discovered_sorcs: BTreeMap::new(),
            discovery_enabled: self.state().discovery_enabled,
        };
        self.discovery.publish(state, DiscoveryAction::Reset);
    }

    /// Run the outdated sweep when due.
    pub fn tick(&mut self, now: Duration, connected: Option<SorcId>) {
        if self.sweep_timer.poll(now) {
            self.remove_outdated(now, connected);
        }
    }
}
