// Licensed under the Apache-2.0 license

//! Status bank written by the engine every tick.
//!
//! Each event is reported twice: as a one-tick pulse, and as a latched bit
//! that stays set until cleared with [`I2cStatus::clear_interrupts`]. The
//! interrupt line is the latched bits filtered through the enable mask.

use crate::i2c::common::{Error, I2cSEvent};
use heapless::Vec;

/// Largest payload a completed read can hand back.
pub const MAX_TRANSFER_LEN: usize = 256;

/// A transfer finished this tick (successfully or not).
pub const TRANSFER_COMPLETE: u32 = 1 << 0;
/// A data byte arrived, on either the master or the slave side.
pub const BYTE_RECEIVED: u32 = 1 << 1;
pub const ARBITRATION_LOST: u32 = 1 << 2;
pub const NO_ACK: u32 = 1 << 3;
/// Illegal transition or a bus that could not be recovered.
pub const BUS_ERROR: u32 = 1 << 4;
pub const START_DETECTED: u32 = 1 << 5;
pub const STOP_DETECTED: u32 = 1 << 6;
/// Our slave address was matched.
pub const ADDRESS_MATCH: u32 = 1 << 7;
/// Internal contract violation; the engine needs a reset.
pub const FATAL: u32 = 1 << 8;

pub const ALL_EVENTS: u32 = TRANSFER_COMPLETE
    | BYTE_RECEIVED
    | ARBITRATION_LOST
    | NO_ACK
    | BUS_ERROR
    | START_DETECTED
    | STOP_DETECTED
    | ADDRESS_MATCH
    | FATAL;

/// Outcome of the last master transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub result: Result<(), Error>,
    /// Bytes read, in order, across every read segment.
    pub read_data: Vec<u8, MAX_TRANSFER_LEN>,
    /// Bytes that were written and acknowledged.
    pub bytes_written: usize,
}

#[derive(Clone, Debug, Default)]
pub struct I2cStatus {
    pulses: u32,
    latched: u32,
    interrupt_enable: u32,
    last_error: Option<Error>,
    last_received: Option<u8>,
    last_slave_event: Option<I2cSEvent>,
    completed: Option<CompletedTransfer>,
}

macro_rules! event_accessors {
    ($($name:ident => $mask:ident),* $(,)?) => {
        paste::paste! {
            impl I2cStatus {
                $(
                    #[must_use]
                    pub const fn [<$name _pulsed>](&self) -> bool {
                        self.pulses & $mask != 0
                    }

                    #[must_use]
                    pub const fn [<$name _latched>](&self) -> bool {
                        self.latched & $mask != 0
                    }
                )*
            }
        }
    };
}

event_accessors! {
    transfer_complete => TRANSFER_COMPLETE,
    byte_received => BYTE_RECEIVED,
    arbitration_lost => ARBITRATION_LOST,
    no_ack => NO_ACK,
    bus_error => BUS_ERROR,
    start_detected => START_DETECTED,
    stop_detected => STOP_DETECTED,
    address_match => ADDRESS_MATCH,
    fatal => FATAL,
}

impl I2cStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the pulses of the previous tick. Called by the engine first
    /// thing each tick.
    pub fn begin_tick(&mut self) {
        self.pulses = 0;
    }

    pub fn raise(&mut self, mask: u32) {
        self.pulses |= mask;
        self.latched |= mask;
    }

    pub fn raise_error(&mut self, error: Error, mask: u32) {
        self.last_error = Some(error);
        self.raise(mask);
    }

    pub fn enable_interrupts(&mut self, mask: u32) {
        self.interrupt_enable |= mask & ALL_EVENTS;
    }

    pub fn disable_interrupts(&mut self, mask: u32) {
        self.interrupt_enable &= !mask;
    }

    /// Acknowledge latched events.
    pub fn clear_interrupts(&mut self, mask: u32) {
        self.latched &= !mask;
    }

    /// Interrupt request line.
    #[must_use]
    pub const fn irq(&self) -> bool {
        self.latched & self.interrupt_enable != 0
    }

    #[must_use]
    pub const fn pulses(&self) -> u32 {
        self.pulses
    }

    #[must_use]
    pub const fn latched(&self) -> u32 {
        self.latched
    }

    #[must_use]
    pub const fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub(crate) fn set_received(&mut self, byte: u8) {
        self.last_received = Some(byte);
        self.raise(BYTE_RECEIVED);
    }

    /// Most recent data byte received on either side.
    #[must_use]
    pub const fn last_received(&self) -> Option<u8> {
        self.last_received
    }

    pub(crate) fn set_slave_event(&mut self, event: I2cSEvent) {
        self.last_slave_event = Some(event);
    }

    #[must_use]
    pub const fn last_slave_event(&self) -> Option<I2cSEvent> {
        self.last_slave_event
    }

    pub(crate) fn complete(&mut self, transfer: CompletedTransfer) {
        match transfer.result {
            Ok(()) => self.raise(TRANSFER_COMPLETE),
            Err(error) => self.raise_error(error, TRANSFER_COMPLETE),
        }
        self.completed = Some(transfer);
    }

    /// Outcome of the last master transaction, if not yet collected.
    pub fn take_completed(&mut self) -> Option<CompletedTransfer> {
        self.completed.take()
    }

    #[must_use]
    pub const fn completed(&self) -> Option<&CompletedTransfer> {
        self.completed.as_ref()
    }
}
