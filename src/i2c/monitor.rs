// Licensed under the Apache-2.0 license

//! Bus edge monitor: framing and fault classification of the sampled lines.

use crate::i2c::bus::{Level, LineLevels};

/// Framing condition observed in one tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusFrameEvent {
    Start,
    RepeatedStart,
    Stop,
    /// DATA changed at a moment other than a stable-low clock and did not
    /// form a START or STOP.
    IllegalTransition,
}

/// Direction of an SCL transition between two samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockEdge {
    Rising,
    Falling,
}

/// Classify one pair of samples. `busy` tells a fresh START apart from a
/// repeated one.
#[must_use]
pub fn classify(prev: LineLevels, now: LineLevels, busy: bool) -> Option<BusFrameEvent> {
    if prev.sda == now.sda {
        return None;
    }
    match (prev.scl, now.scl) {
        (Level::Low, Level::Low) => None,
        (Level::High, Level::High) => Some(match now.sda {
            Level::Low if busy => BusFrameEvent::RepeatedStart,
            Level::Low => BusFrameEvent::Start,
            Level::High => BusFrameEvent::Stop,
        }),
        // DATA moved in the same tick as a clock edge.
        _ => Some(BusFrameEvent::IllegalTransition),
    }
}

/// Stateful wrapper around [`classify`] holding the previous sample and
/// the bus busy/free bookkeeping.
#[derive(Clone, Debug)]
pub struct BusMonitor {
    prev: LineLevels,
    now: LineLevels,
    busy: bool,
    idle_ticks: u32,
}

impl Default for BusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BusMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prev: LineLevels::IDLE,
            now: LineLevels::IDLE,
            busy: false,
            idle_ticks: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take this tick's sample and report at most one framing event.
    pub fn sample(&mut self, levels: LineLevels) -> Option<BusFrameEvent> {
        self.prev = self.now;
        self.now = levels;

        let event = classify(self.prev, self.now, self.busy);
        match event {
            Some(BusFrameEvent::Start | BusFrameEvent::RepeatedStart) => self.busy = true,
            Some(BusFrameEvent::Stop) => self.busy = false,
            _ => {}
        }

        if !self.busy && levels.is_idle() {
            self.idle_ticks = self.idle_ticks.saturating_add(1);
        } else {
            self.idle_ticks = 0;
        }
        event
    }

    /// SCL transition between the previous and the current sample.
    #[must_use]
    pub fn clock_edge(&self) -> Option<ClockEdge> {
        match (self.prev.scl, self.now.scl) {
            (Level::Low, Level::High) => Some(ClockEdge::Rising),
            (Level::High, Level::Low) => Some(ClockEdge::Falling),
            _ => None,
        }
    }

    /// A START has been seen and no STOP since.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Consecutive ticks the bus has been free with both lines high.
    #[must_use]
    pub const fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    #[must_use]
    pub const fn current(&self) -> LineLevels {
        self.now
    }
}
