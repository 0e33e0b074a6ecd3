// Licensed under the Apache-2.0 license

//! High-level I2C controller on top of the protocol engine.
//!
//! This module drives an [`I2cEngine`] on a simulated bus shared with a set
//! of peers and exposes it through the embedded-hal `I2c` traits, for both
//! 7-bit and 10-bit addresses. It is also the policy layer that puts a time
//! limit on clock stretching, which the engine itself never does.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{Error, I2cConfig};
use crate::i2c::controller::I2cEngine;
use crate::i2c::simulation::{BusAgent, BusNode, SimulatedBus};
use crate::i2c::status::{CompletedTransfer, I2cStatus};
use crate::i2c::target::NoTarget;
use crate::i2c::traits::I2cTarget;
use crate::i2c::transaction::{Address, Transaction, MAX_SEGMENT_LEN};
use embedded_hal::i2c::{Operation, SevenBitAddress, TenBitAddress};
use fugit::{HertzU32, MillisDurationU32};
use heapless::Vec;

pub struct I2cController<P: BusAgent = (), T: I2cTarget = NoTarget, L: Logger = NoOpLogger> {
    pub node: BusNode<T, L>,
    /// Every other participant on the bus.
    pub peers: P,
    pub bus: SimulatedBus,
    tick_rate: HertzU32,
    timeout: MillisDurationU32,
}

impl<P: BusAgent, T: I2cTarget, L: Logger> I2cController<P, T, L> {
    /// Controller ticking at 1 MHz with a 10 ms transfer timeout.
    pub fn new(engine: I2cEngine<T, L>, config: I2cConfig, peers: P) -> Self {
        Self {
            node: BusNode::new(engine, config),
            peers,
            bus: SimulatedBus::new(),
            tick_rate: HertzU32::from_raw(1_000_000),
            timeout: MillisDurationU32::millis(10),
        }
    }

    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: HertzU32) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ticks a transfer may take before it is abandoned.
    #[must_use]
    pub fn tick_budget(&self) -> u64 {
        u64::from(self.timeout.ticks()) * u64::from(self.tick_rate.raw()) / 1000
    }

    pub fn engine(&self) -> &I2cEngine<T, L> {
        &self.node.engine
    }

    pub fn engine_mut(&mut self) -> &mut I2cEngine<T, L> {
        &mut self.node.engine
    }

    pub fn status(&self) -> &I2cStatus {
        &self.node.status
    }

    /// Advance the bus by one tick.
    pub fn step(&mut self) {
        self.bus.step(&mut [&mut self.node as &mut dyn BusAgent, &mut self.peers]);
    }

    /// Queue `transaction` without waiting for it.
    ///
    /// # Errors
    ///
    /// See [`I2cEngine::request_transfer`].
    pub fn start(&mut self, transaction: Transaction) -> Result<(), Error> {
        // Drop the outcome of an earlier, uncollected transfer.
        self.node.status.take_completed();
        self.node
            .engine
            .request_transfer(transaction, &self.node.config)
    }

    /// Advance one tick and report the queued transfer's outcome once it is
    /// known.
    ///
    /// # Errors
    ///
    /// `WouldBlock` while the transfer is in flight; otherwise the error the
    /// transfer ended with.
    pub fn poll(&mut self) -> nb::Result<CompletedTransfer, Error> {
        self.step();
        match self.node.status.take_completed() {
            Some(done) => match done.result {
                Ok(()) => Ok(done),
                Err(error) => Err(nb::Error::Other(error)),
            },
            None => Err(nb::Error::WouldBlock),
        }
    }

    /// Run `transaction` to completion within the tick budget. On timeout
    /// the engine is reset so the bus is released.
    ///
    /// # Errors
    ///
    /// Returns the transfer error, or [`Error::Timeout`].
    pub fn execute(&mut self, transaction: Transaction) -> Result<CompletedTransfer, Error> {
        self.start(transaction)?;
        for _ in 0..self.tick_budget() {
            match self.poll() {
                Ok(done) => return Ok(done),
                Err(nb::Error::Other(error)) => return Err(error),
                Err(nb::Error::WouldBlock) => {}
            }
        }
        self.node.engine.reset();
        self.step();
        Err(Error::Timeout)
    }

    /// Clock a stuck bus free.
    ///
    /// # Errors
    ///
    /// [`Error::BusStuck`] if SDA never came free, or a request error from
    /// [`I2cEngine::request_bus_recovery`].
    pub fn recover_bus(&mut self) -> Result<(), Error> {
        self.node.status.take_completed();
        self.node.engine.request_bus_recovery(&self.node.config)?;
        for _ in 0..self.tick_budget() {
            match self.poll() {
                Ok(_) => return Ok(()),
                Err(nb::Error::Other(error)) => return Err(error),
                Err(nb::Error::WouldBlock) => {}
            }
        }
        self.node.engine.reset();
        Err(Error::Timeout)
    }

    fn run_operations(
        &mut self,
        address: Address,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        let transaction = build_transaction(address, operations)?;
        let done = self.execute(transaction)?;

        let mut read = done.read_data.as_slice();
        for operation in operations.iter_mut() {
            if let Operation::Read(buffer) = operation {
                let (head, tail) = read.split_at_checked(buffer.len()).ok_or(Error::Fatal)?;
                buffer.copy_from_slice(head);
                read = tail;
            }
        }
        Ok(())
    }
}

/// Turn embedded-hal operations into segments. Adjacent operations of the
/// same kind share a segment, since they must not be separated by a
/// repeated START.
fn build_transaction(address: Address, operations: &[Operation<'_>]) -> Result<Transaction, Error> {
    let mut transaction = Transaction::new(address)?;
    let mut iter = operations.iter().peekable();
    while let Some(operation) = iter.next() {
        match operation {
            Operation::Write(first) => {
                let mut bytes = Vec::<u8, MAX_SEGMENT_LEN>::new();
                bytes.extend_from_slice(first).map_err(|()| Error::BufferOverflow)?;
                while let Some(Operation::Write(more)) = iter.peek() {
                    bytes.extend_from_slice(more).map_err(|()| Error::BufferOverflow)?;
                    iter.next();
                }
                transaction.push_write(&bytes)?;
            }
            Operation::Read(first) => {
                let mut len = first.len();
                while let Some(Operation::Read(more)) = iter.peek() {
                    len += more.len();
                    iter.next();
                }
                transaction.push_read(len)?;
            }
        }
    }
    Ok(transaction)
}

impl<P: BusAgent, T: I2cTarget, L: Logger> embedded_hal::i2c::ErrorType for I2cController<P, T, L> {
    type Error = Error;
}

impl<P: BusAgent, T: I2cTarget, L: Logger> embedded_hal::i2c::I2c<SevenBitAddress>
    for I2cController<P, T, L>
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_operations(Address::SevenBit(address), operations)
    }
}

impl<P: BusAgent, T: I2cTarget, L: Logger> embedded_hal::i2c::I2c<TenBitAddress>
    for I2cController<P, T, L>
{
    fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_operations(Address::TenBit(address), operations)
    }
}
