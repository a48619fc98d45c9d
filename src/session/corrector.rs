//! Duty-Cycle State Correction
//!
//! The MAC engine expresses duty-cycle availability as timestamps on its own
//! tick clock, which restarts from zero at every boot. Across a deep-sleep
//! interval no clock runs, so a restored session must have every availability
//! timestamp reduced by the elapsed real time before the engine sees it again.
//! Without the correction the radio either believes it is still restricted
//! after waking, blocking valid transmissions, or, if the timestamps were
//! naively zeroed, appears infinitely available and violates the regulatory
//! budget.

use crate::constants::TICKS_PER_SECOND;
use crate::session::RadioSession;

/// Reduce every availability timestamp of `session` by `elapsed_secs` of
/// real time, clamped at a floor of zero. A band that was already available
/// stays available; the subtraction never produces a negative debt.
///
/// Pure function: the input session is not modified.
pub fn correct_for_elapsed(session: &RadioSession, elapsed_secs: u32) -> RadioSession {
    let elapsed_ticks = u64::from(elapsed_secs) * u64::from(TICKS_PER_SECOND);
    let elapsed_ticks = u32::try_from(elapsed_ticks).unwrap_or(u32::MAX);

    let mut corrected = session.clone();
    for availability in corrected.per_band_availability.iter_mut() {
        *availability = availability.saturating_sub(elapsed_ticks);
    }
    corrected.global_duty_availability = corrected
        .global_duty_availability
        .saturating_sub(elapsed_ticks);
    corrected
}
