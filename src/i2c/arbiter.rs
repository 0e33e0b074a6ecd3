// Licensed under the Apache-2.0 license

//! Clock arbiter: generates SCL for a master and lets a slave hold it low.
//!
//! The arbiter never assumes SCL went high because it stopped pulling it.
//! It waits for the observed line, which is what gives wired-AND clock
//! synchronisation between masters and honours clock stretching.

use crate::i2c::bus::{BusLine, Level};
use crate::i2c::common::TimingConfig;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArbiterState {
    /// Pulling SCL low for the low half-period.
    DriveLow,
    /// Released SCL, waiting to observe it high.
    WaitRelease,
    /// SCL released and observed high.
    DriveHigh,
    /// Holding SCL low on request (slave stretch).
    StretchHold,
}

#[derive(Clone, Debug)]
pub struct ClockArbiter {
    state: ArbiterState,
    elapsed: u32,
    running: bool,
    stretch: bool,
    scl: BusLine,
}

impl Default for ClockArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockArbiter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ArbiterState::DriveHigh,
            elapsed: 0,
            running: false,
            stretch: false,
            scl: BusLine::new(),
        }
    }

    /// Release SCL and forget any clocking or stretch request.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Begin clocking: the next tick starts a low half-period.
    pub fn start(&mut self) {
        self.running = true;
        self.enter_low(0);
    }

    /// Finish the current low half-period, then leave SCL released.
    pub fn halt(&mut self) {
        self.running = false;
    }

    /// Stop clocking and release SCL immediately.
    pub fn release(&mut self) {
        self.running = false;
        self.stretch = false;
        self.state = ArbiterState::DriveHigh;
        self.elapsed = 0;
        self.scl.release();
    }

    /// Hold SCL low. Takes effect at once while SCL is observed low; while it
    /// is high the request is latched until the next low half-period, so a
    /// stretch never cuts a high phase short.
    pub fn request_stretch(&mut self) {
        self.stretch = true;
        if self.scl.observed().is_low() && self.state != ArbiterState::StretchHold {
            let may_hold = match self.state {
                ArbiterState::DriveLow | ArbiterState::WaitRelease => true,
                ArbiterState::DriveHigh => !self.running,
                ArbiterState::StretchHold => false,
            };
            if may_hold {
                self.enter_stretch();
            }
        }
    }

    pub fn release_stretch(&mut self) {
        self.stretch = false;
        if self.state == ArbiterState::StretchHold {
            self.state = ArbiterState::WaitRelease;
            self.scl.release();
        }
    }

    /// Advance one tick with this tick's observed SCL level.
    pub fn tick(&mut self, observed: Level, timing: &TimingConfig) {
        self.scl.observe(observed);
        match self.state {
            ArbiterState::DriveLow => {
                self.elapsed = self.elapsed.saturating_add(1);
                if self.stretch {
                    self.enter_stretch();
                } else if self.elapsed >= timing.scl_low_ticks {
                    self.state = ArbiterState::WaitRelease;
                    self.scl.release();
                }
            }
            ArbiterState::WaitRelease => {
                if self.stretch && observed.is_low() {
                    self.enter_stretch();
                } else if observed.is_high() {
                    self.state = ArbiterState::DriveHigh;
                    self.elapsed = 1;
                    if self.running && self.elapsed >= timing.scl_high_ticks {
                        self.enter_low(0);
                    }
                }
            }
            ArbiterState::DriveHigh => {
                if !self.running {
                    if self.stretch && observed.is_low() {
                        self.enter_stretch();
                    }
                } else if observed.is_low() {
                    // Another master ended the high phase first; its low
                    // half-period has already begun.
                    self.enter_low(1);
                } else {
                    self.elapsed = self.elapsed.saturating_add(1);
                    if self.elapsed >= timing.scl_high_ticks {
                        self.enter_low(0);
                    }
                }
            }
            ArbiterState::StretchHold => {
                if !self.stretch {
                    self.state = ArbiterState::WaitRelease;
                    self.scl.release();
                }
            }
        }
    }

    fn enter_low(&mut self, elapsed: u32) {
        self.state = ArbiterState::DriveLow;
        self.elapsed = elapsed;
        self.scl.pull_low();
    }

    fn enter_stretch(&mut self) {
        self.state = ArbiterState::StretchHold;
        self.scl.pull_low();
    }

    #[must_use]
    pub const fn state(&self) -> ArbiterState {
        self.state
    }

    /// Clock generation is active.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// A stretch has been requested and not yet released.
    #[must_use]
    pub const fn is_stretching(&self) -> bool {
        self.stretch
    }

    /// SCL output for the next tick.
    #[must_use]
    pub const fn scl_low(&self) -> bool {
        self.scl.drive_enabled()
    }
}
