// Licensed under the Apache-2.0 license

//! # I2C Target Traits
//!
//! The slave half of the engine never owns data. It hands every addressed
//! frame, received byte, and transmit slot to a *target* implementing the
//! traits below, and turns the answers into ACK/NACK bits or clock
//! stretching on the bus.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! I2cTargetCore (framing callbacks)
//!     ├── ReadTarget  (master reads from us)
//!     ├── WriteTarget (master writes to us)
//!     └── I2cTarget   (read + write, blanket impl)
//! ```
//!
//! Byte callbacks run inside the engine tick. A target that cannot answer
//! yet returns `Busy`; the engine then holds SCL low (when clock stretching
//! is enabled) and asks again on the next tick.

use crate::i2c::transaction::Direction;

/// Answer to a master read request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadResponse {
    Byte(u8),
    /// Not ready yet; stretch the clock and ask again.
    Busy,
}

/// Answer to a byte written by the master.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteResponse {
    Ack,
    /// Refuse the byte. The master is expected to STOP.
    Nack,
    /// Not ready yet; stretch the clock and offer the byte again.
    Busy,
}

/// Framing callbacks.
pub trait I2cTargetCore {
    /// A START (or repeated START) was seen on the bus.
    fn on_transaction_start(&mut self, _repeated: bool) {}

    /// An address frame selected one of our configured addresses (or the
    /// general call address 0). Returning `false` leaves the address
    /// unacknowledged.
    fn on_address_match(&mut self, _address: u16, _direction: Direction) -> bool {
        true
    }

    /// The frame we were part of ended with a STOP.
    fn on_stop(&mut self) {}
}

/// Supplies bytes for master reads.
pub trait ReadTarget: I2cTargetCore {
    fn on_read(&mut self) -> ReadResponse;

    /// The master acknowledged (`true`) or refused the byte just sent. A
    /// refusal ends the read.
    fn on_read_ack(&mut self, _acked: bool) {}
}

/// Consumes bytes from master writes.
pub trait WriteTarget: I2cTargetCore {
    fn on_write(&mut self, byte: u8) -> WriteResponse;
}

/// A complete target.
pub trait I2cTarget: ReadTarget + WriteTarget {}

impl<T> I2cTarget for T where T: ReadTarget + WriteTarget {}
