// Licensed under the Apache-2.0 license

//! Wired-AND bus simulation.
//!
//! Every participant implements [`BusAgent`]. A step of [`SimulatedBus`]
//! resolves the lines from what every agent currently drives, then clocks
//! every agent with the same resolved levels, so all agents advance in
//! lockstep on one shared time base.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::bus::{resolve, LineDrive, LineLevels};
use crate::i2c::common::I2cConfig;
use crate::i2c::controller::I2cEngine;
use crate::i2c::status::I2cStatus;
use crate::i2c::target::NoTarget;
use crate::i2c::traits::I2cTarget;

/// One participant on the bus.
pub trait BusAgent {
    /// Drive asserted during the current step.
    fn drive(&self) -> LineDrive;

    /// Advance one step with the resolved levels.
    fn clock(&mut self, levels: LineLevels);
}

/// A fixed driver, e.g. a device holding SDA low.
impl BusAgent for LineDrive {
    fn drive(&self) -> LineDrive {
        *self
    }

    fn clock(&mut self, _levels: LineLevels) {}
}

/// Nobody.
impl BusAgent for () {
    fn drive(&self) -> LineDrive {
        LineDrive::RELEASED
    }

    fn clock(&mut self, _levels: LineLevels) {}
}

impl<A: BusAgent + ?Sized> BusAgent for &mut A {
    fn drive(&self) -> LineDrive {
        (**self).drive()
    }

    fn clock(&mut self, levels: LineLevels) {
        (**self).clock(levels);
    }
}

macro_rules! tuple_agent {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: BusAgent),+> BusAgent for ($($name,)+) {
            fn drive(&self) -> LineDrive {
                LineDrive::RELEASED$(.combine(self.$idx.drive()))+
            }

            fn clock(&mut self, levels: LineLevels) {
                $(self.$idx.clock(levels);)+
            }
        }
    };
}

tuple_agent!(A.0);
tuple_agent!(A.0, B.1);
tuple_agent!(A.0, B.1, C.2);
tuple_agent!(A.0, B.1, C.2, D.3);

/// An engine together with the configuration and status bank it owns.
pub struct BusNode<T: I2cTarget = NoTarget, L: Logger = NoOpLogger> {
    pub engine: I2cEngine<T, L>,
    pub config: I2cConfig,
    pub status: I2cStatus,
}

impl<T: I2cTarget, L: Logger> BusNode<T, L> {
    pub fn new(engine: I2cEngine<T, L>, config: I2cConfig) -> Self {
        Self {
            engine,
            config,
            status: I2cStatus::new(),
        }
    }
}

impl<T: I2cTarget, L: Logger> BusAgent for BusNode<T, L> {
    fn drive(&self) -> LineDrive {
        self.engine.drive()
    }

    fn clock(&mut self, levels: LineLevels) {
        self.engine.tick(levels, &self.config, &mut self.status);
    }
}

/// The two shared lines.
#[derive(Clone, Debug, Default)]
pub struct SimulatedBus {
    levels: LineLevels,
    ticks: u64,
}

impl SimulatedBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the lines and clock every agent once.
    pub fn step(&mut self, agents: &mut [&mut dyn BusAgent]) -> LineLevels {
        let levels = resolve(agents.iter().map(|agent| agent.drive()));
        for agent in agents.iter_mut() {
            agent.clock(levels);
        }
        self.levels = levels;
        self.ticks += 1;
        levels
    }

    /// Step until `done` holds after a step, for at most `max_ticks` steps.
    /// Returns the number of steps taken, or `None` on exhaustion.
    pub fn run_until<F>(
        &mut self,
        agents: &mut [&mut dyn BusAgent],
        max_ticks: u64,
        mut done: F,
    ) -> Option<u64>
    where
        F: FnMut(LineLevels) -> bool,
    {
        for step in 1..=max_ticks {
            let levels = self.step(agents);
            if done(levels) {
                return Some(step);
            }
        }
        None
    }

    /// Levels resolved by the last step.
    #[must_use]
    pub const fn levels(&self) -> LineLevels {
        self.levels
    }

    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }
}
