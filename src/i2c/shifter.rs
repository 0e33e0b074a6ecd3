// Licensed under the Apache-2.0 license

//! Bit/byte shifter: MSB-first serialisation of one byte plus the ninth
//! (acknowledge) bit.
//!
//! Bits are carried as [`Level`]s; an acknowledge is [`Level::Low`].

use crate::i2c::bus::Level;

/// Index of the acknowledge slot.
pub const ACK_BIT_INDEX: u8 = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShiftDirection {
    Transmit,
    Receive,
}

/// Shift register state.
///
/// `bit_index` is the slot handled by the next shift: 0..=7 are data bits
/// (MSB first), 8 is the acknowledge slot. Once the acknowledge slot has
/// been shifted the byte is complete and the index stays at 8.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shifter {
    buffer: u8,
    bit_index: u8,
    direction: ShiftDirection,
    complete: bool,
    ack: Option<Level>,
}

impl Default for Shifter {
    fn default() -> Self {
        Self::new()
    }
}

impl Shifter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: 0,
            bit_index: 0,
            direction: ShiftDirection::Receive,
            complete: true,
            ack: None,
        }
    }

    /// Buffer `byte` for transmission. Aborts any byte in progress.
    pub fn load(&mut self, byte: u8) {
        *self = Self {
            buffer: byte,
            bit_index: 0,
            direction: ShiftDirection::Transmit,
            complete: false,
            ack: None,
        };
    }

    /// Prepare to accumulate a received byte.
    pub fn begin_receive(&mut self) {
        *self = Self {
            buffer: 0,
            bit_index: 0,
            direction: ShiftDirection::Receive,
            complete: false,
            ack: None,
        };
    }

    /// Next bit to put on the wire. Yields bits 7..0 of the loaded byte, then
    /// `ack` for the acknowledge slot. Further calls after completion keep
    /// returning `ack`.
    pub fn shift_out(&mut self, ack: Level) -> Level {
        if self.bit_index < ACK_BIT_INDEX {
            let bit = (self.buffer >> (7 - self.bit_index)) & 1 != 0;
            self.bit_index += 1;
            Level::from(bit)
        } else {
            self.complete = true;
            self.ack = Some(ack);
            ack
        }
    }

    /// Accumulate one sampled bit. Returns the byte once the acknowledge
    /// slot has been sampled.
    pub fn shift_in(&mut self, bit: Level) -> Option<u8> {
        if self.bit_index < ACK_BIT_INDEX {
            self.buffer = (self.buffer << 1) | u8::from(bit.is_high());
            self.bit_index += 1;
            None
        } else {
            self.complete = true;
            self.ack = Some(bit);
            Some(self.buffer)
        }
    }

    #[must_use]
    pub const fn bit_index(&self) -> u8 {
        self.bit_index
    }

    #[must_use]
    pub const fn direction(&self) -> ShiftDirection {
        self.direction
    }

    /// All eight data bits have passed; the acknowledge slot is next.
    #[must_use]
    pub const fn data_complete(&self) -> bool {
        self.bit_index == ACK_BIT_INDEX
    }

    /// The acknowledge slot has been shifted as well.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Safe point for a `load` or `begin_receive`: nothing shifted yet, or
    /// the previous byte fully done.
    #[must_use]
    pub const fn at_boundary(&self) -> bool {
        self.complete || self.bit_index == 0
    }

    /// Bits accumulated (receive) or the loaded byte (transmit).
    #[must_use]
    pub const fn buffer(&self) -> u8 {
        self.buffer
    }

    /// Level of the acknowledge slot once it has been shifted.
    #[must_use]
    pub const fn ack(&self) -> Option<Level> {
        self.ack
    }
}
