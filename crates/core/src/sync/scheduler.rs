//! Core scheduler constants/helpers for background sync.

/// Foreground full-sync cadence in seconds.
pub const SYNC_FOREGROUND_INTERVAL_SECS: u64 = 45;

/// Maximum jitter (seconds) added to periodic sync intervals.
pub const SYNC_INTERVAL_JITTER_SECS: u64 = 5;

/// How often the scheduler samples connectivity to detect offline to online transitions.
pub const CONNECTIVITY_POLL_INTERVAL_SECS: u64 = 5;

/// Delay before the next periodic pass: the base interval plus `jitter_ms` folded into the
/// jitter bound.
pub fn periodic_delay_ms(interval_secs: u64, jitter_ms: u64) -> u64 {
    let jitter_bound = SYNC_INTERVAL_JITTER_SECS.saturating_mul(1000);
    let jitter = if jitter_bound > 0 {
        jitter_ms % jitter_bound
    } else {
        0
    };
    interval_secs.saturating_mul(1000).saturating_add(jitter)
}
