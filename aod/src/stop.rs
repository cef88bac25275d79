//! The level-triggered stop signal every component polls.
//!
//! This is the "process-wide queues used as sentinel-signaled shutdown
//! channels" design note's resolution: an explicit, level-triggered
//! signal rather than an in-band sentinel value threaded through every
//! channel. Once set it stays set; there is no un-stopping a daemon.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct StopSignal {
    stopped: AtomicBool,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
        }
    }

    pub fn set(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_is_level_triggered() {
        let stop = StopSignal::new();
        assert!(!stop.is_set());
        stop.set();
        assert!(stop.is_set());
        stop.set();
        assert!(stop.is_set());
    }
}
