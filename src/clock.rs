//! Tick clock for the cooperative scheduler
//!
//! Every wait in the engine is "loop until condition or budget, one tick
//! at a time". A tick is one fixed frame (20 ms by default).

use std::time::{Duration, Instant};

pub const DEFAULT_TICK_MS: u64 = 20;

/// Ticks per second at the default period
pub const TICKS_PER_SECOND: u32 = (1000 / DEFAULT_TICK_MS) as u32;

pub trait Clock {
    /// Block until the next tick boundary
    fn wait_tick(&mut self);

    /// Ticks elapsed since the clock was created
    fn ticks(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for Box<T> {
    fn wait_tick(&mut self) {
        (**self).wait_tick()
    }
    fn ticks(&self) -> u64 {
        (**self).ticks()
    }
}

/// Wall-clock frames. Deadlines advance by whole periods so a slow
/// iteration does not push every later tick back.
pub struct FrameClock {
    period: Duration,
    next: Instant,
    count: u64,
}

impl FrameClock {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            period,
            next: Instant::now() + period,
            count: 0,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::from_millis(DEFAULT_TICK_MS)
    }
}

impl Clock for FrameClock {
    fn wait_tick(&mut self) {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            // fell behind; resynchronise instead of bursting
            self.next = now + self.period;
        }
        self.count += 1;
    }

    fn ticks(&self) -> u64 {
        self.count
    }
}

/// Clock that never sleeps; ticks are counted only
#[derive(Default)]
pub struct ManualClock {
    count: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ManualClock {
    fn wait_tick(&mut self) {
        self.count += 1;
    }

    fn ticks(&self) -> u64 {
        self.count
    }
}
