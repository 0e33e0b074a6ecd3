// Licensed under the Apache-2.0 license

//! Ready-made targets.

use crate::i2c::traits::{I2cTargetCore, ReadResponse, ReadTarget, WriteResponse, WriteTarget};
use crate::i2c::transaction::Direction;

/// Target for a master-only engine: refuses every address and byte.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTarget;

impl I2cTargetCore for NoTarget {
    fn on_address_match(&mut self, _address: u16, _direction: Direction) -> bool {
        false
    }
}

impl ReadTarget for NoTarget {
    fn on_read(&mut self) -> ReadResponse {
        ReadResponse::Byte(0xFF)
    }
}

impl WriteTarget for NoTarget {
    fn on_write(&mut self, _byte: u8) -> WriteResponse {
        WriteResponse::Nack
    }
}

/// Register file of `N` bytes behind an auto-incrementing pointer.
///
/// The first byte of every write selects the register; following bytes are
/// stored from there on. Reads return registers from the pointer on. The
/// pointer wraps at `N`. A pointer byte outside the file is NACKed.
#[derive(Clone, Debug)]
pub struct RegisterTarget<const N: usize> {
    registers: [u8; N],
    pointer: usize,
    expect_pointer: bool,
    stall: u32,
    matched: Option<u16>,
    stops: u32,
}

impl<const N: usize> Default for RegisterTarget<N> {
    fn default() -> Self {
        Self::new([0; N])
    }
}

impl<const N: usize> RegisterTarget<N> {
    #[must_use]
    pub const fn new(registers: [u8; N]) -> Self {
        Self {
            registers,
            pointer: 0,
            expect_pointer: false,
            stall: 0,
            matched: None,
            stops: 0,
        }
    }

    /// Answer the next `count` byte callbacks with `Busy`.
    pub fn stall(&mut self, count: u32) {
        self.stall = count;
    }

    #[must_use]
    pub const fn registers(&self) -> &[u8; N] {
        &self.registers
    }

    #[must_use]
    pub const fn pointer(&self) -> usize {
        self.pointer
    }

    /// Address of the last frame that selected us.
    #[must_use]
    pub const fn matched(&self) -> Option<u16> {
        self.matched
    }

    /// STOPs seen while addressed.
    #[must_use]
    pub const fn stops(&self) -> u32 {
        self.stops
    }

    fn stalled(&mut self) -> bool {
        if self.stall > 0 {
            self.stall -= 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        self.pointer = (self.pointer + 1) % N.max(1);
    }
}

impl<const N: usize> I2cTargetCore for RegisterTarget<N> {
    fn on_address_match(&mut self, address: u16, direction: Direction) -> bool {
        self.matched = Some(address);
        self.expect_pointer = direction == Direction::Write;
        true
    }

    fn on_stop(&mut self) {
        self.stops += 1;
        self.expect_pointer = false;
    }
}

impl<const N: usize> ReadTarget for RegisterTarget<N> {
    fn on_read(&mut self) -> ReadResponse {
        if self.stalled() {
            return ReadResponse::Busy;
        }
        let byte = self.registers.get(self.pointer).copied().unwrap_or(0xFF);
        self.advance();
        ReadResponse::Byte(byte)
    }
}

impl<const N: usize> WriteTarget for RegisterTarget<N> {
    fn on_write(&mut self, byte: u8) -> WriteResponse {
        if self.stalled() {
            return WriteResponse::Busy;
        }
        if self.expect_pointer {
            self.expect_pointer = false;
            if usize::from(byte) >= N {
                return WriteResponse::Nack;
            }
            self.pointer = usize::from(byte);
            return WriteResponse::Ack;
        }
        match self.registers.get_mut(self.pointer) {
            Some(register) => {
                *register = byte;
                self.advance();
                WriteResponse::Ack
            }
            None => WriteResponse::Nack,
        }
    }
}
