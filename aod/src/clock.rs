//! Monotonic-clock helper shared by the analyzer (anomaly action
//! timestamps) and the collector (archive directory names). Grounded on
//! the reference daemon's own `get_boot_time_ns` helper in its sequencer
//! consumer, which reaches for `nix::time::clock_gettime` rather than
//! `std::time::Instant` because the value needs to be a plain integer
//! usable as a directory name and a cross-iteration comparison key.

use nix::time::{clock_gettime, ClockId};

/// Current monotonic time in nanoseconds. Falls back to 0 on platforms
/// where `CLOCK_MONOTONIC` is unavailable, which never happens on Linux
/// but keeps this infallible for callers.
pub fn monotonic_now_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => (ts.tv_sec() as u64) * 1_000_000_000 + (ts.tv_nsec() as u64),
        Err(_) => 0,
    }
}
