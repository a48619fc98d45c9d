//! Protocol and regulatory constants shared across the crate.

use std::time::Duration;

/// Radio clock resolution: one tick is 16 µs, so 62 500 ticks per second.
/// Duty-cycle availability timestamps are expressed in these ticks.
pub const TICKS_PER_SECOND: u32 = 62_500;

/// Number of regulatory frequency bands tracked for EU868
/// (milli, centi, deci and the auxiliary FSK band).
pub const MAX_BANDS: usize = 4;

/// MAC-engine payload ceiling in bytes for a single uplink.
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Highest application-defined port. Port 0 is reserved for MAC commands
/// and ports above 223 are reserved by the LoRaWAN specification.
pub const MAX_PORT: u8 = 223;

/// EU868 maximum conducted transmit power in dBm.
pub const DEFAULT_TX_POWER_DBM: i8 = 14;

/// Overall ceiling for a single join campaign. Long enough to exhaust
/// several escalation tiers of the spreading-factor ladder.
pub const DEFAULT_JOIN_BUDGET: Duration = Duration::from_secs(600);

/// Wait budget of the first (fastest) join tier. Each escalation doubles it.
pub const DEFAULT_JOIN_TIER_BASE: Duration = Duration::from_secs(15);

/// Clamp for the per-tier wait budget, so the slowest spreading factor is
/// retried periodically instead of being waited on forever.
pub const DEFAULT_JOIN_TIER_MAX: Duration = Duration::from_secs(300);

/// Default bounded wait for a transmit-complete confirmation.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval at which the background task services the engine event loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
