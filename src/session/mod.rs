//! # Radio Session State
//!
//! This module provides the RadioSession struct, the power-cycle-surviving
//! state of the LoRaWAN link: join status, uplink frame counter and the
//! regulatory duty-cycle availability timestamps per frequency band.
//!
//! The session is snapshotted to a non-volatile holding area before every
//! deep-sleep transition and restored (with duty-cycle correction for the
//! elapsed interval) at the next boot. A session with a zero uplink frame
//! counter is the sentinel for "no session": a real joined session has sent
//! at least one uplink.

pub mod corrector;
pub mod store;

use crate::constants::MAX_BANDS;
use serde::{Deserialize, Serialize};

pub use corrector::correct_for_elapsed;
pub use store::{FileSessionStore, MemorySessionStore, SessionManager, SessionStore};

/// Persisted radio session state.
///
/// Owned exclusively by the controller; the owning application only ever
/// sees clones. Reset to the default ("no session") only by an explicit
/// factory reset, never silently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioSession {
    /// Whether the network has accepted a join for this session.
    pub joined: bool,

    /// Device address assigned by the network on join.
    /// Meaningful only while `joined` is true.
    pub device_address: u32,

    /// Strictly increasing uplink frame counter. Never reused for a given
    /// device address; the network rejects replayed counters.
    pub frame_counter_up: u32,

    /// "May transmit again after this point" timestamp per frequency band,
    /// in radio-clock ticks.
    pub per_band_availability: [u32; MAX_BANDS],

    /// Global duty-cycle availability timestamp in radio-clock ticks.
    pub global_duty_availability: u32,

    /// Whether link-check mode is requested on every uplink.
    pub link_check_enabled: bool,
}

impl RadioSession {
    /// Whether this snapshot represents a usable prior session.
    ///
    /// A zero frame counter signals an absent session: the holding area was
    /// never written, was erased by a factory reset, or decoded to garbage.
    pub fn is_present(&self) -> bool {
        self.frame_counter_up != 0
    }
}

/// Live duty-cycle and frame counters as tracked by the MAC engine,
/// merged into the persisted session just before a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub frame_counter_up: u32,
    pub per_band_availability: [u32; MAX_BANDS],
    pub global_duty_availability: u32,
}

impl RadioSession {
    /// Overwrite the engine-tracked counters of this session.
    pub fn apply_counters(&mut self, counters: &SessionCounters) {
        self.frame_counter_up = counters.frame_counter_up;
        self.per_band_availability = counters.per_band_availability;
        self.global_duty_availability = counters.global_duty_availability;
    }
}
