//! # Radio MAC Engine Boundary
//!
//! This module defines the trait and types through which the controller
//! drives the external LoRaWAN MAC engine: the protocol implementation that
//! handles channel hopping, encryption, receive-window timing and duty-cycle
//! bookkeeping in radio ticks.
//!
//! The engine is not re-entrant. Only the controller's background task may
//! invoke its operations; everything it reports back arrives as [`MacEvent`]s
//! returned from [`MacEngine::run_pending_events`], which the task converts
//! into completion signals for the public API.

pub mod mock;

use crate::constants::MAX_BANDS;
use crate::session::{RadioSession, SessionCounters};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors reported by a MAC engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("a transmit or receive window is already pending")]
    TxPending,

    #[error("join procedure rejected: {0}")]
    Join(String),

    #[error("radio fault: {0}")]
    Radio(String),
}

bitflags! {
    /// Engine operating-mode word, mirrored by the background task so public
    /// operations can decide whether to block or proceed without touching
    /// the engine itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpMode: u16 {
        /// A join handshake is in progress.
        const JOINING = 0x0001;
        /// A transmit or its receive windows are pending; no new uplink
        /// may be started.
        const TXRXPEND = 0x0002;
        /// Link-check mode is active.
        const LINKCHECK = 0x0004;
    }
}

/// LoRa data rate expressed as a spreading factor. Escalation runs from the
/// fastest factor (SF7, least airtime) toward the slowest (SF12, most
/// airtime, longest range).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DataRate {
    SF7,
    SF8,
    SF9,
    SF10,
    SF11,
    SF12,
}

impl DataRate {
    /// The next coarser (slower, longer-range) data rate. SF12 is the floor
    /// of the ladder and escalates to itself.
    pub fn coarser(self) -> DataRate {
        match self {
            DataRate::SF7 => DataRate::SF8,
            DataRate::SF8 => DataRate::SF9,
            DataRate::SF9 => DataRate::SF10,
            DataRate::SF10 => DataRate::SF11,
            DataRate::SF11 | DataRate::SF12 => DataRate::SF12,
        }
    }

    /// Whether this is the slowest tier of the ladder.
    pub fn is_slowest(self) -> bool {
        self == DataRate::SF12
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Over-the-air-activation application key. Zeroed on drop and redacted
/// from debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AppKey(pub [u8; 16]);

impl fmt::Debug for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppKey(..)")
    }
}

/// Immutable per-device radio identity, supplied once at controller
/// construction.
#[derive(Debug, Clone)]
pub struct RadioIdentity {
    /// IEEE EUI-64 device identifier.
    pub device_eui: [u8; 8],

    /// OTAA application key.
    pub app_key: AppKey,
}

impl RadioIdentity {
    pub fn new(device_eui: [u8; 8], app_key: [u8; 16]) -> Self {
        Self {
            device_eui,
            app_key: AppKey(app_key),
        }
    }
}

/// A single uplink channel of the regional plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Channel {
    /// Center frequency in Hz.
    pub frequency_hz: u32,

    /// Index of the regulatory band this channel draws its duty-cycle
    /// budget from (0..MAX_BANDS).
    pub band: u8,
}

/// Regional channel plan handed to the engine at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPlan {
    pub channels: Vec<Channel>,

    /// Maximum conducted transmit power for the region in dBm.
    pub max_power_dbm: i8,
}

impl ChannelPlan {
    /// The EU868 plan: eight 125 kHz LoRa channels on the 1% duty-cycle
    /// band plus the 868.8 MHz FSK channel on the 0.1% band.
    pub fn eu868() -> Self {
        let centi = [
            868_100_000,
            868_300_000,
            868_500_000,
            867_100_000,
            867_300_000,
            867_500_000,
            867_700_000,
            867_900_000,
        ];
        let mut channels: Vec<Channel> = centi
            .iter()
            .map(|&frequency_hz| Channel {
                frequency_hz,
                band: 1,
            })
            .collect();
        channels.push(Channel {
            frequency_hz: 868_800_000,
            band: 0,
        });
        Self {
            channels,
            max_power_dbm: 14,
        }
    }
}

/// Asynchronous notifications delivered by the engine's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacEvent {
    /// The network accepted the join and assigned a device address.
    Joined { device_address: u32 },

    /// A join cycle completed without network acceptance.
    JoinFailed,

    /// The pending uplink (and its receive windows) completed.
    TransmitComplete,

    /// A downlink payload arrived. Contents are opaque to this layer.
    DownlinkReceived { port: u8, payload: Vec<u8> },

    /// The network answered (or definitively failed) a time request.
    /// `epoch_secs` is only meaningful when `valid` is true.
    NetworkTimeReceived { epoch_secs: u64, valid: bool },
}

/// The external LoRaWAN MAC engine.
///
/// Implementations are driven exclusively from the controller's background
/// task; no method here is ever called from two contexts at once.
pub trait MacEngine: Send {
    /// One-time setup with the device identity and regional channel plan.
    fn initialize(&mut self, identity: &RadioIdentity, plan: &ChannelPlan)
        -> Result<(), EngineError>;

    /// Discard any engine-internal session state and start from scratch.
    fn reset_session(&mut self);

    /// Hand a restored session (device address, counters, corrected
    /// duty-cycle availability) back to the engine.
    fn apply_session(&mut self, session: &RadioSession);

    /// Select the spreading factor and transmit power for subsequent
    /// activity.
    fn set_data_rate(&mut self, data_rate: DataRate, tx_power_dbm: i8);

    /// Enable or disable the per-uplink link-check request.
    fn set_link_check_mode(&mut self, enabled: bool);

    /// Begin an over-the-air activation handshake. Outcome arrives later as
    /// [`MacEvent::Joined`] or [`MacEvent::JoinFailed`].
    fn start_join(&mut self) -> Result<(), EngineError>;

    /// Queue one uplink. Completion arrives as [`MacEvent::TransmitComplete`]
    /// after the frame counter has been consumed.
    fn transmit(&mut self, port: u8, payload: &[u8]) -> Result<(), EngineError>;

    /// Issue a network time request. The answer arrives as
    /// [`MacEvent::NetworkTimeReceived`].
    fn request_network_time(&mut self);

    /// Current operating-mode word.
    fn opmode(&self) -> OpMode;

    /// Live frame counter and duty-cycle availability, for session
    /// snapshots.
    fn session_counters(&self) -> SessionCounters;

    /// Advance the protocol state machine and collect any events that fired
    /// since the last call. Must be polled continuously by the owning task.
    fn run_pending_events(&mut self) -> Vec<MacEvent>;
}

/// Compile-time guard that band indices fit the session array.
const _: () = assert!(MAX_BANDS <= u8::MAX as usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_rate_ladder_is_monotonic_with_sf12_floor() {
        let mut dr = DataRate::SF7;
        let mut seen = vec![dr];
        for _ in 0..8 {
            dr = dr.coarser();
            seen.push(dr);
        }
        for pair in seen.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(dr, DataRate::SF12);
        assert_eq!(DataRate::SF12.coarser(), DataRate::SF12);
    }

    #[test]
    fn eu868_plan_has_nine_channels_in_two_bands() {
        let plan = ChannelPlan::eu868();
        assert_eq!(plan.channels.len(), 9);
        assert_eq!(plan.max_power_dbm, 14);
        assert_eq!(plan.channels[0].frequency_hz, 868_100_000);
        assert!(plan.channels.iter().all(|c| (c.band as usize) < MAX_BANDS));
    }

    #[test]
    fn app_key_debug_is_redacted() {
        let identity = RadioIdentity::new([1; 8], [0x2B; 16]);
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("2B"));
        assert!(rendered.contains("AppKey(..)"));
    }
}
