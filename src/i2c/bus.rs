// Licensed under the Apache-2.0 license

//! Open-drain line model.
//!
//! A line is only ever pulled low; it reads high when no participant pulls
//! it. The resolved level of the bus is the wired-AND of every driver.

/// Logic level of a bus line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Level {
    Low,
    #[default]
    High,
}

impl Level {
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }

    #[must_use]
    pub const fn is_low(self) -> bool {
        matches!(self, Level::Low)
    }
}

impl From<bool> for Level {
    fn from(bit: bool) -> Self {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        level.is_high()
    }
}

/// Resolved levels of both lines as seen by every participant in one tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineLevels {
    pub scl: Level,
    pub sda: Level,
}

impl LineLevels {
    /// Both lines floating high.
    pub const IDLE: Self = Self {
        scl: Level::High,
        sda: Level::High,
    };

    #[must_use]
    pub const fn new(scl: Level, sda: Level) -> Self {
        Self { scl, sda }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.scl.is_high() && self.sda.is_high()
    }
}

impl Default for LineLevels {
    fn default() -> Self {
        Self::IDLE
    }
}

/// What one participant asserts on the bus during a tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct LineDrive {
    pub scl_low: bool,
    pub sda_low: bool,
}

impl LineDrive {
    /// Neither line pulled.
    pub const RELEASED: Self = Self {
        scl_low: false,
        sda_low: false,
    };

    #[must_use]
    pub const fn is_released(&self) -> bool {
        !self.scl_low && !self.sda_low
    }

    /// Wired-AND of two drivers.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        Self {
            scl_low: self.scl_low || other.scl_low,
            sda_low: self.sda_low || other.sda_low,
        }
    }

    /// Levels the bus settles to if this is the only driver.
    #[must_use]
    pub const fn levels(self) -> LineLevels {
        LineLevels {
            scl: if self.scl_low { Level::Low } else { Level::High },
            sda: if self.sda_low { Level::Low } else { Level::High },
        }
    }
}

/// Lowest-driver-wins reduction over every participant.
pub fn resolve<I>(drivers: I) -> LineLevels
where
    I: IntoIterator<Item = LineDrive>,
{
    drivers
        .into_iter()
        .fold(LineDrive::RELEASED, LineDrive::combine)
        .levels()
}

/// One participant's port on a single line: the level it last observed and
/// whether its open-drain output is enabled.
///
/// The output stage can only sink current, so an enabled driver always
/// drives [`Level::Low`]; "high" is the absence of a driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct BusLine {
    observed: Level,
    drive_enable: bool,
}

impl BusLine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observed: Level::High,
            drive_enable: false,
        }
    }

    pub fn pull_low(&mut self) {
        self.drive_enable = true;
    }

    pub fn release(&mut self) {
        self.drive_enable = false;
    }

    /// Drive a data bit: `High` releases the line, `Low` pulls it.
    pub fn put(&mut self, level: Level) {
        self.drive_enable = level.is_low();
    }

    pub fn observe(&mut self, level: Level) {
        self.observed = level;
    }

    #[must_use]
    pub const fn observed(&self) -> Level {
        self.observed
    }

    #[must_use]
    pub const fn drive_enabled(&self) -> bool {
        self.drive_enable
    }

    /// Level this port is trying to put on the line.
    #[must_use]
    pub const fn driven(&self) -> Level {
        if self.drive_enable {
            Level::Low
        } else {
            Level::High
        }
    }
}
