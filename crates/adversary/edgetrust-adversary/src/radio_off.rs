use edgetrust_config::RadioOffConfig;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// On/off control of the network interface. Redundant calls must be safe.
pub trait RadioControl {
    fn radio_on(&mut self);
    fn radio_off(&mut self);
    fn is_on(&self) -> bool;
}

/// Hardware watchdog that resets the device unless fed.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Watchdog for targets that have none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttackConfigError {
    #[error("Radio-off interval must be non-zero")]
    ZeroInterval,

    #[error("Radio-off duration must be non-zero")]
    ZeroDuration,

    #[error("Watchdog feed period must be non-zero")]
    ZeroWatchdogPeriod,
}

/// How often the radio is forced off and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioOffSchedule {
    interval: Duration,
    duration: Duration,
}

impl RadioOffSchedule {
    /// Zero values panic, which is a build error when evaluated in a `const`:
    ///
    /// ```compile_fail
    /// use edgetrust_adversary::RadioOffSchedule;
    /// use std::time::Duration;
    /// const BAD: RadioOffSchedule = RadioOffSchedule::new(Duration::ZERO, Duration::from_millis(5));
    /// let _ = BAD;
    /// ```
    pub const fn new(interval: Duration, duration: Duration) -> Self {
        if interval.is_zero() {
            panic!("radio-off interval must be non-zero");
        }
        if duration.is_zero() {
            panic!("radio-off duration must be non-zero");
        }
        Self { interval, duration }
    }

    /// Runtime counterpart of [`RadioOffSchedule::new`].
    pub fn try_new(interval: Duration, duration: Duration) -> Result<Self, AttackConfigError> {
        if interval.is_zero() {
            return Err(AttackConfigError::ZeroInterval);
        }
        if duration.is_zero() {
            return Err(AttackConfigError::ZeroDuration);
        }
        Ok(Self { interval, duration })
    }

    pub fn from_config(config: &RadioOffConfig) -> Result<Self, AttackConfigError> {
        Self::try_new(config.interval(), config.duration())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

struct WatchdogFeed<W> {
    watchdog: W,
    period: Duration,
}

/// Denial of service against the local radio.
///
/// While the radio is off the attack spins on the current thread without
/// yielding, so no other cooperative task can run and turn the interface
/// back on. This is the only place in the workspace that blocks the
/// scheduler on purpose.
pub struct RadioOffAttack<R, W = NoWatchdog> {
    radio: R,
    schedule: RadioOffSchedule,
    watchdog: Option<WatchdogFeed<W>>,
    cycles: u64,
}

impl<R: RadioControl> RadioOffAttack<R, NoWatchdog> {
    pub fn new(radio: R, schedule: RadioOffSchedule) -> Self {
        Self {
            radio,
            schedule,
            watchdog: None,
            cycles: 0,
        }
    }
}

impl<R: RadioControl, W: Watchdog> RadioOffAttack<R, W> {
    /// Feed `watchdog` every `period` while the radio is held off.
    pub fn with_watchdog<W2: Watchdog>(
        self,
        watchdog: W2,
        period: Duration,
    ) -> Result<RadioOffAttack<R, W2>, AttackConfigError> {
        if period.is_zero() {
            return Err(AttackConfigError::ZeroWatchdogPeriod);
        }
        Ok(RadioOffAttack {
            radio: self.radio,
            schedule: self.schedule,
            watchdog: Some(WatchdogFeed { watchdog, period }),
            cycles: self.cycles,
        })
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn watchdog(&self) -> Option<&W> {
        self.watchdog.as_ref().map(|feed| &feed.watchdog)
    }

    pub fn schedule(&self) -> RadioOffSchedule {
        self.schedule
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Turn the radio off, spin for the configured duration, turn it back on.
    ///
    /// Returns how many times the watchdog was fed.
    pub fn cycle(&mut self) -> u32 {
        let duration = self.schedule.duration;
        warn!("Forcing radio off for {:?}", duration);
        self.radio.radio_off();

        let start = Instant::now();
        let deadline = start + duration;
        let mut next_feed = self.watchdog.as_ref().map(|feed| start + feed.period);
        let mut feeds = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let (Some(feed), Some(due)) = (self.watchdog.as_mut(), next_feed.as_mut()) {
                if now >= *due {
                    feed.watchdog.feed();
                    feeds += 1;
                    *due += feed.period;
                }
            }
            std::hint::spin_loop();
        }

        self.radio.radio_on();
        self.cycles += 1;
        debug!(cycle = self.cycles, feeds, "Radio back on");
        feeds
    }

    /// Run `count` attack cycles, sleeping for the interval before each.
    pub async fn run_cycles(&mut self, count: u64) {
        for _ in 0..count {
            tokio::time::sleep(self.schedule.interval).await;
            self.cycle();
        }
    }

    /// Attack forever.
    pub async fn run(mut self) {
        loop {
            tokio::time::sleep(self.schedule.interval).await;
            self.cycle();
        }
    }
}
