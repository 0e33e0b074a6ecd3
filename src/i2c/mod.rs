// Licensed under the Apache-2.0 license

//! Tick-driven I2C protocol engine.
//!
//! The engine is built from four units that all advance on one shared tick:
//!
//! * [`monitor`]: classifies START, repeated START, STOP and illegal DATA
//!   movement from consecutive line samples.
//! * [`shifter`]: MSB-first byte serialisation with the acknowledge slot.
//! * [`arbiter`]: SCL generation with clock synchronisation and stretching.
//! * [`controller`]: the master/slave state machine sequencing the others.
//!
//! [`simulation`] connects engines through a wired-AND bus, and
//! [`i2c_controller`] puts an embedded-hal `I2c` front end on top.

pub mod arbiter;
pub mod bus;
pub mod common;
pub mod controller;
pub mod i2c_controller;
pub mod monitor;
pub mod shifter;
pub mod simulation;
pub mod status;
pub mod target;
pub mod traits;
pub mod transaction;

pub use common::{Error, I2cConfig, I2cConfigBuilder};
pub use controller::{ControllerState, I2cEngine};
pub use i2c_controller::I2cController;
pub use transaction::{Address, Transaction};
