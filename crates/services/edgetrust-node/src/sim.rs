//! Stand-ins for the radio driver and hardware watchdog when the node runs on
//! a host rather than on the device.

use edgetrust_adversary::{RadioControl, Watchdog};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Radio whose state is a shared flag, so other tasks can observe outages.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    on: Arc<AtomicBool>,
    toggles: Arc<AtomicU64>,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            on: Arc::new(AtomicBool::new(true)),
            toggles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of actual on/off transitions; redundant calls are not counted.
    pub fn toggles(&self) -> u64 {
        self.toggles.load(Ordering::Relaxed)
    }

    fn set(&self, on: bool) {
        if self.on.swap(on, Ordering::Relaxed) != on {
            self.toggles.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Simulated radio {}", if on { "on" } else { "off" });
        }
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioControl for SimulatedRadio {
    fn radio_on(&mut self) {
        self.set(true);
    }

    fn radio_off(&mut self) {
        self.set(false);
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct LoggingWatchdog {
    feeds: u64,
}

impl LoggingWatchdog {
    pub fn feeds(&self) -> u64 {
        self.feeds
    }
}

impl Watchdog for LoggingWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
        tracing::trace!(feeds = self.feeds, "Watchdog fed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundant_calls_are_safe() {
        let mut radio = SimulatedRadio::new();
        let observer = radio.clone();

        radio.radio_on();
        assert_eq!(observer.toggles(), 0);

        radio.radio_off();
        radio.radio_off();
        assert!(!observer.is_on());
        assert_eq!(observer.toggles(), 1);

        radio.radio_on();
        assert!(observer.is_on());
        assert_eq!(observer.toggles(), 2);
    }
}
