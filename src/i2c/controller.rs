// Licensed under the Apache-2.0 license

//! Protocol controller: the master/slave state machine that sequences
//! START, address, data, acknowledge and STOP on top of the edge monitor,
//! the shifter and the clock arbiter.
//!
//! # Tick model
//!
//! [`I2cEngine::tick`] is called once per time step with the resolved bus
//! levels of that step. It updates every unit from those levels and returns
//! the drive the engine asserts for the *next* step, like a bank of
//! flip-flops clocked on the same edge.
//!
//! Transmitters change SDA on the tick they observe SCL fall, so the new bit
//! appears while SCL is still low; receivers sample on the tick they observe
//! SCL rise. SCL therefore has to stay low for at least two ticks, which the
//! configuration builder enforces.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::arbiter::ClockArbiter;
use crate::i2c::bus::{BusLine, Level, LineDrive, LineLevels};
use crate::i2c::common::{AddressMode, Error, I2cConfig, I2cSEvent};
use crate::i2c::monitor::{BusFrameEvent, BusMonitor, ClockEdge};
use crate::i2c::shifter::Shifter;
use crate::i2c::status::{
    CompletedTransfer, I2cStatus, ADDRESS_MATCH, ARBITRATION_LOST, BUS_ERROR, FATAL, NO_ACK,
    START_DETECTED, STOP_DETECTED,
};
use crate::i2c::target::NoTarget;
use crate::i2c::traits::{I2cTarget, ReadResponse, WriteResponse};
use crate::i2c::transaction::{
    Direction, HeaderByte, Transaction, TEN_BIT_PREFIX, TEN_BIT_PREFIX_MASK,
};
use embedded_hal::i2c::NoAcknowledgeSource;
use heapless::Vec;

/// SCL pulses clocked out while trying to free a stuck SDA line.
pub const RECOVERY_PULSES: u8 = 9;

/// Recovery sequences attempted for one failed STOP before giving up.
pub const MAX_RECOVERY_ATTEMPTS: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    GenerateStart,
    AddressPhase,
    DataPhaseTx,
    DataPhaseRx,
    AckPhaseTx,
    AckPhaseRx,
    GenerateStop,
    ArbitrationLost,
    FatalError,
    /// Clocking SCL with SDA released until a stuck slave lets go.
    BusRecovery,
    AwaitAddressMatch,
    SlaveAckAddress,
    SlaveDataTx,
    SlaveDataRx,
    SlaveSendAck,
    SlaveWaitAck,
}

impl ControllerState {
    /// The engine owns the bus as master.
    #[must_use]
    pub const fn is_master_active(self) -> bool {
        matches!(
            self,
            ControllerState::GenerateStart
                | ControllerState::AddressPhase
                | ControllerState::DataPhaseTx
                | ControllerState::DataPhaseRx
                | ControllerState::AckPhaseTx
                | ControllerState::AckPhaseRx
                | ControllerState::GenerateStop
                | ControllerState::BusRecovery
        )
    }

    #[must_use]
    pub const fn is_slave(self) -> bool {
        matches!(
            self,
            ControllerState::AwaitAddressMatch
                | ControllerState::SlaveAckAddress
                | ControllerState::SlaveDataTx
                | ControllerState::SlaveDataRx
                | ControllerState::SlaveSendAck
                | ControllerState::SlaveWaitAck
        )
    }

    /// Master states in which the engine shifts address or data bits.
    const fn is_shifting(self) -> bool {
        matches!(
            self,
            ControllerState::AddressPhase
                | ControllerState::DataPhaseTx
                | ControllerState::DataPhaseRx
                | ControllerState::AckPhaseTx
                | ControllerState::AckPhaseRx
        )
    }
}

/// Multi-master contention bookkeeping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ArbitrationState {
    /// Driving DATA while another master may be driving as well.
    pub is_contending: bool,
    pub lost: bool,
    /// Shifter bit index (0 = MSB) of the bit that lost.
    pub lost_at_bit: Option<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StartStage {
    /// Waiting for the bus-free time, then pulling SDA low.
    Fresh,
    /// Repeated START: waiting for the clock to go low to release SDA.
    AwaitLow,
    /// Repeated START: SDA released, waiting out the high setup time.
    AwaitHigh,
    /// SDA low under a high clock, waiting out the hold time.
    Hold,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StopStage {
    AwaitLow,
    AwaitHigh,
    Release,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AddressMatch {
    /// First byte of a 10-bit write header with our two high bits.
    TenBitPrefix(u8),
    Full(u16, Direction),
}

/// Slave work that may have to wait for the target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlaveAction {
    Transmit,
    Acknowledge(u8),
}

#[derive(Clone, Debug, Default)]
struct SlaveContext {
    /// Still sampling the current frame; cleared on a foreign address.
    listening: bool,
    /// Addressed at some point since the last STOP.
    engaged: bool,
    matched: Option<AddressMatch>,
    ten_bit_prefix: Option<u8>,
    /// Full 10-bit address selected earlier in this frame, for a read
    /// re-address after a repeated START.
    ten_bit_selected: Option<u16>,
    acked: bool,
    pending: Option<SlaveAction>,
    release_stretch: bool,
}

/// I2C protocol engine.
///
/// `T` answers slave traffic; `L` receives a debug record for every state
/// transition and an error record for every fault.
pub struct I2cEngine<T: I2cTarget = NoTarget, L: Logger = NoOpLogger> {
    state: ControllerState,
    monitor: BusMonitor,
    shifter: Shifter,
    arbiter: ClockArbiter,
    sda: BusLine,
    arbitration: ArbitrationState,
    transaction: Option<Transaction>,
    header: Vec<HeaderByte, 3>,
    header_index: usize,
    start_stage: StartStage,
    stop_stage: StopStage,
    counter: u32,
    pending_error: Option<Error>,
    recovery_pulses: u8,
    recovery_attempts: u8,
    slave: SlaveContext,
    target: T,
    logger: L,
}

impl<T: I2cTarget + Default, L: Logger + Default> Default for I2cEngine<T, L> {
    fn default() -> Self {
        Self::new(T::default(), L::default())
    }
}

impl<T: I2cTarget, L: Logger> I2cEngine<T, L> {
    pub fn new(target: T, logger: L) -> Self {
        Self {
            state: ControllerState::Idle,
            monitor: BusMonitor::new(),
            shifter: Shifter::new(),
            arbiter: ClockArbiter::new(),
            sda: BusLine::new(),
            arbitration: ArbitrationState::default(),
            transaction: None,
            header: Vec::new(),
            header_index: 0,
            start_stage: StartStage::Fresh,
            stop_stage: StopStage::AwaitLow,
            counter: 0,
            pending_error: None,
            recovery_pulses: 0,
            recovery_attempts: 0,
            slave: SlaveContext::default(),
            target,
            logger,
        }
    }

    /// Return to `Idle` and release both lines. Any active transaction is
    /// dropped. The edge monitor keeps its history so the next sample is
    /// still classified against the real bus.
    pub fn reset(&mut self) {
        if self.state != ControllerState::Idle {
            self.logger
                .debug(format_args!("i2c: reset from {:?}", self.state));
        }
        self.state = ControllerState::Idle;
        self.shifter = Shifter::new();
        self.arbiter.reset();
        self.sda.release();
        self.arbitration = ArbitrationState::default();
        self.transaction = None;
        self.header.clear();
        self.header_index = 0;
        self.start_stage = StartStage::Fresh;
        self.stop_stage = StopStage::AwaitLow;
        self.counter = 0;
        self.pending_error = None;
        self.recovery_pulses = 0;
        self.recovery_attempts = 0;
        self.slave = SlaveContext::default();
    }

    /// Queue a master transaction. It starts once the bus has been free for
    /// the configured bus-free time.
    ///
    /// # Errors
    ///
    /// * [`Error::Disabled`] if the engine is disabled.
    /// * [`Error::Unsupported`] if the role has no master, the transaction
    ///   is empty, or it needs 10-bit addressing while that is turned off.
    /// * [`Error::Fatal`] until the engine is reset after a contract violation.
    /// * [`Error::Busy`] while another transaction or a slave frame is active.
    pub fn request_transfer(
        &mut self,
        transaction: Transaction,
        config: &I2cConfig,
    ) -> Result<(), Error> {
        if !config.enabled {
            return Err(Error::Disabled);
        }
        if !config.role.is_master()
            || transaction.segments().is_empty()
            || (transaction.address().is_ten_bit() && !config.capabilities.ten_bit_addressing)
        {
            return Err(Error::Unsupported);
        }
        if self.state == ControllerState::FatalError {
            return Err(Error::Fatal);
        }
        if self.transaction.is_some() || self.state != ControllerState::Idle {
            return Err(Error::Busy);
        }

        self.header = transaction.header();
        self.header_index = 0;
        self.pending_error = None;
        self.recovery_attempts = 0;
        self.transaction = Some(transaction);
        self.start_stage = StartStage::Fresh;
        self.transition(ControllerState::GenerateStart);
        Ok(())
    }

    /// Clock the bus until SDA is released, then STOP. The outcome is
    /// reported as a completed transfer.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] without a master role or with recovery turned
    /// off, [`Error::Busy`] unless the engine is idle.
    pub fn request_bus_recovery(&mut self, config: &I2cConfig) -> Result<(), Error> {
        if !config.enabled {
            return Err(Error::Disabled);
        }
        if !config.role.is_master() || !config.capabilities.bus_recovery {
            return Err(Error::Unsupported);
        }
        if self.state != ControllerState::Idle || self.transaction.is_some() {
            return Err(Error::Busy);
        }
        self.pending_error = None;
        self.recovery_attempts = 0;
        self.enter_recovery();
        Ok(())
    }

    /// Advance every unit by one tick.
    ///
    /// `levels` are the resolved bus levels of this tick. The returned drive
    /// is what this engine asserts during the next tick.
    pub fn tick(
        &mut self,
        levels: LineLevels,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) -> LineDrive {
        status.begin_tick();
        let event = self.monitor.sample(levels);
        self.arbiter.tick(levels.scl, &config.timing);
        self.sda.observe(levels.sda);

        if !config.enabled {
            if self.state != ControllerState::Idle || self.transaction.is_some() {
                if self.transaction.is_some() {
                    self.complete_transfer(Err(Error::Disabled), status);
                }
                self.reset();
            }
            return self.drive();
        }

        if self.state == ControllerState::FatalError {
            return self.drive();
        }

        if let Some(event) = event {
            let before = self.state;
            self.on_frame_event(event, config, status);
            if self.state != before {
                return self.drive();
            }
        }

        let edge = self.monitor.clock_edge();
        match self.state {
            ControllerState::Idle => {
                if self.transaction.is_some() && config.role.is_master() {
                    self.start_stage = StartStage::Fresh;
                    self.transition(ControllerState::GenerateStart);
                }
            }
            ControllerState::GenerateStart => self.on_generate_start(levels, edge, config, status),
            ControllerState::AddressPhase => self.on_address_phase(levels, edge, config, status),
            ControllerState::DataPhaseTx => self.on_data_tx(levels, edge, config, status),
            ControllerState::AckPhaseTx => self.on_ack_tx(levels, edge, status),
            ControllerState::DataPhaseRx => self.on_data_rx(levels, edge),
            ControllerState::AckPhaseRx => self.on_ack_rx(levels, edge, status),
            ControllerState::GenerateStop => self.on_generate_stop(levels, edge, config, status),
            ControllerState::ArbitrationLost => {
                if !self.monitor.is_busy() && levels.is_idle() {
                    self.arbitration = ArbitrationState::default();
                    self.transition(ControllerState::Idle);
                }
            }
            ControllerState::BusRecovery => self.on_bus_recovery(levels, edge, status),
            ControllerState::FatalError => {}
            ControllerState::AwaitAddressMatch
            | ControllerState::SlaveAckAddress
            | ControllerState::SlaveDataTx
            | ControllerState::SlaveDataRx
            | ControllerState::SlaveSendAck
            | ControllerState::SlaveWaitAck => self.on_slave(levels, edge, config, status),
        }
        self.drive()
    }

    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub const fn arbitration(&self) -> ArbitrationState {
        self.arbitration
    }

    #[must_use]
    pub const fn shifter(&self) -> &Shifter {
        &self.shifter
    }

    #[must_use]
    pub const fn arbiter(&self) -> &ClockArbiter {
        &self.arbiter
    }

    #[must_use]
    pub const fn monitor(&self) -> &BusMonitor {
        &self.monitor
    }

    /// Active master transaction, if any.
    #[must_use]
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// What this engine asserts on the bus this tick.
    #[must_use]
    pub const fn drive(&self) -> LineDrive {
        LineDrive {
            scl_low: self.arbiter.scl_low(),
            sda_low: self.sda.drive_enabled(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn logger_mut(&mut self) -> &mut L {
        &mut self.logger
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state != next {
            self.logger
                .debug(format_args!("i2c: {:?} -> {:?}", self.state, next));
            if next == ControllerState::Idle {
                // Idle is a byte boundary whichever way it was reached.
                self.shifter = Shifter::new();
            }
            self.state = next;
        }
    }

    fn on_frame_event(&mut self, event: BusFrameEvent, config: &I2cConfig, status: &mut I2cStatus) {
        match event {
            BusFrameEvent::Start | BusFrameEvent::RepeatedStart => {
                status.raise(START_DETECTED);
                let repeated = event == BusFrameEvent::RepeatedStart;
                match self.state {
                    ControllerState::GenerateStart => {
                        if self.start_stage == StartStage::Fresh && config.role.is_slave() {
                            // Somebody else took the bus first; serve it and
                            // retry our transaction afterwards.
                            self.begin_slave_frame(repeated, status);
                        }
                    }
                    // Recovery ends with a START/STOP pair.
                    ControllerState::GenerateStop | ControllerState::BusRecovery => {}
                    state if state.is_shifting() => {
                        self.bus_fault(Error::IllegalBusTransition, BUS_ERROR, status);
                    }
                    ControllerState::Idle => {
                        if config.role.is_slave() {
                            self.begin_slave_frame(repeated, status);
                        }
                    }
                    state if state.is_slave() => self.begin_slave_frame(repeated, status),
                    _ => {}
                }
            }
            BusFrameEvent::Stop => {
                status.raise(STOP_DETECTED);
                if self.state.is_slave() {
                    self.end_slave_frame(status);
                } else if self.state.is_shifting() {
                    self.logger
                        .error(format_args!("i2c: STOP during {:?}", self.state));
                    status.raise_error(Error::IllegalBusTransition, BUS_ERROR);
                    self.pending_error = Some(Error::IllegalBusTransition);
                    self.finish(status);
                }
                if self.state != ControllerState::ArbitrationLost {
                    self.arbitration = ArbitrationState::default();
                }
            }
            BusFrameEvent::IllegalTransition => {
                status.raise_error(Error::IllegalBusTransition, BUS_ERROR);
                if self.state.is_shifting()
                    || (self.state == ControllerState::GenerateStart
                        && self.start_stage == StartStage::Hold)
                {
                    self.bus_fault(Error::IllegalBusTransition, 0, status);
                } else if self.state.is_slave() {
                    self.logger
                        .error(format_args!("i2c: illegal transition in {:?}", self.state));
                    self.release_slave();
                    self.slave = SlaveContext::default();
                    self.transition(ControllerState::Idle);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Master
    // ---------------------------------------------------------------------

    fn on_generate_start(
        &mut self,
        levels: LineLevels,
        edge: Option<ClockEdge>,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) {
        let timing = &config.timing;
        match self.start_stage {
            StartStage::Fresh => {
                if !self.monitor.is_busy() && self.monitor.idle_ticks() >= timing.bus_free_ticks {
                    self.sda.pull_low();
                    self.start_stage = StartStage::Hold;
                    self.counter = 0;
                }
            }
            StartStage::AwaitLow => {
                if edge == Some(ClockEdge::Falling) {
                    self.arbiter.halt();
                    self.sda.release();
                    self.start_stage = StartStage::AwaitHigh;
                    self.counter = 0;
                }
            }
            StartStage::AwaitHigh => {
                if levels.scl.is_high() {
                    if levels.sda.is_low() && config.capabilities.multi_master {
                        self.lose_arbitration(None, status);
                        return;
                    }
                    self.counter += 1;
                    if self.counter >= timing.scl_high_ticks {
                        self.sda.pull_low();
                        self.start_stage = StartStage::Hold;
                        self.counter = 0;
                    }
                }
            }
            StartStage::Hold => {
                if levels.scl.is_high() && levels.sda.is_low() {
                    self.counter += 1;
                    if self.counter >= timing.start_hold_ticks {
                        let Some(first) = self.header.get(self.header_index).copied() else {
                            self.fatal(status);
                            return;
                        };
                        self.arbiter.start();
                        if self.load_byte(first.byte, status) {
                            self.transition(ControllerState::AddressPhase);
                        }
                    }
                }
            }
        }
    }

    fn on_address_phase(
        &mut self,
        levels: LineLevels,
        edge: Option<ClockEdge>,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) {
        match edge {
            Some(ClockEdge::Falling) => self.shift_out_bit(config),
            Some(ClockEdge::Rising) => {
                if self.shifter.is_complete() {
                    self.on_address_ack(levels.sda.is_low(), status);
                } else {
                    self.check_arbitration(levels, config, status);
                }
            }
            None => {}
        }
    }

    fn on_address_ack(&mut self, acked: bool, status: &mut I2cStatus) {
        if !acked {
            self.bus_fault(
                Error::NoAcknowledge(NoAcknowledgeSource::Address),
                NO_ACK,
                status,
            );
            return;
        }
        self.header_index += 1;
        match self.header.get(self.header_index).copied() {
            Some(next) if next.restart => self.begin_restart(),
            Some(next) => {
                self.load_byte(next.byte, status);
            }
            None => self.begin_segment_data(status),
        }
    }

    fn begin_segment_data(&mut self, status: &mut I2cStatus) {
        let Some(txn) = self.transaction.as_ref() else {
            self.fatal(status);
            return;
        };
        let direction = txn.current().map(|s| s.direction());
        let next_byte = txn.next_write_byte();
        match (direction, next_byte) {
            (Some(Direction::Write), Some(byte)) => {
                if self.load_byte(byte, status) {
                    self.transition(ControllerState::DataPhaseTx);
                }
            }
            (Some(Direction::Read), _) => {
                if self.begin_receive(status) {
                    self.transition(ControllerState::DataPhaseRx);
                }
            }
            _ => self.end_segment(),
        }
    }

    fn end_segment(&mut self) {
        let next = self.transaction.as_mut().is_some_and(Transaction::advance);
        if next {
            if let Some(txn) = self.transaction.as_ref() {
                self.header = txn.header();
            }
            self.header_index = 0;
            self.begin_restart();
        } else {
            self.begin_stop();
        }
    }

    fn begin_restart(&mut self) {
        self.start_stage = StartStage::AwaitLow;
        self.transition(ControllerState::GenerateStart);
    }

    fn begin_stop(&mut self) {
        self.stop_stage = StopStage::AwaitLow;
        self.counter = 0;
        self.transition(ControllerState::GenerateStop);
    }

    fn shift_out_bit(&mut self, config: &I2cConfig) {
        let bit = self.shifter.shift_out(Level::High);
        self.sda.put(bit);
        self.arbitration.is_contending = config.capabilities.multi_master && !self.shifter.is_complete();
    }

    /// Compare the bit we drove with the bus. Returns `true` if lost.
    fn check_arbitration(
        &mut self,
        levels: LineLevels,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) -> bool {
        if !config.capabilities.multi_master {
            return false;
        }
        if self.sda.driven().is_high() && levels.sda.is_low() {
            let bit = self.shifter.bit_index().saturating_sub(1);
            self.lose_arbitration(Some(bit), status);
            return true;
        }
        false
    }

    fn lose_arbitration(&mut self, bit: Option<u8>, status: &mut I2cStatus) {
        self.logger.error(format_args!(
            "i2c: arbitration lost in {:?} at bit {:?}",
            self.state, bit
        ));
        self.arbitration = ArbitrationState {
            is_contending: false,
            lost: true,
            lost_at_bit: bit,
        };
        self.sda.release();
        self.arbiter.release();
        status.raise_error(Error::ArbitrationLost, ARBITRATION_LOST);
        self.complete_transfer(Err(Error::ArbitrationLost), status);
        self.transition(ControllerState::ArbitrationLost);
    }

    fn on_data_tx(
        &mut self,
        levels: LineLevels,
        edge: Option<ClockEdge>,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) {
        match edge {
            Some(ClockEdge::Falling) => {
                let last_bit_sent = self.shifter.data_complete();
                self.shift_out_bit(config);
                if last_bit_sent {
                    self.transition(ControllerState::AckPhaseTx);
                }
            }
            Some(ClockEdge::Rising) => {
                self.check_arbitration(levels, config, status);
            }
            None => {}
        }
    }

    fn on_ack_tx(&mut self, levels: LineLevels, edge: Option<ClockEdge>, status: &mut I2cStatus) {
        if edge != Some(ClockEdge::Rising) {
            return;
        }
        let acked = levels.sda.is_low();
        let Some(txn) = self.transaction.as_mut() else {
            self.fatal(status);
            return;
        };
        txn.record_write(acked);
        if !acked {
            self.bus_fault(Error::NoAcknowledge(NoAcknowledgeSource::Data), NO_ACK, status);
            return;
        }
        match txn.next_write_byte() {
            Some(byte) => {
                if self.load_byte(byte, status) {
                    self.transition(ControllerState::DataPhaseTx);
                }
            }
            None => self.end_segment(),
        }
    }

    fn on_data_rx(&mut self, levels: LineLevels, edge: Option<ClockEdge>) {
        match edge {
            Some(ClockEdge::Falling) => {
                if self.shifter.data_complete() {
                    let last = self
                        .transaction
                        .as_ref()
                        .map_or(true, Transaction::is_last_read_byte);
                    self.sda.put(if last { Level::High } else { Level::Low });
                    self.transition(ControllerState::AckPhaseRx);
                } else {
                    self.sda.release();
                }
            }
            Some(ClockEdge::Rising) => {
                if !self.shifter.data_complete() {
                    self.shifter.shift_in(levels.sda);
                }
            }
            None => {}
        }
    }

    fn on_ack_rx(&mut self, levels: LineLevels, edge: Option<ClockEdge>, status: &mut I2cStatus) {
        if edge != Some(ClockEdge::Rising) {
            return;
        }
        let Some(byte) = self.shifter.shift_in(levels.sda) else {
            return;
        };
        let acked = self.sda.drive_enabled();
        status.set_received(byte);
        let Some(txn) = self.transaction.as_mut() else {
            self.fatal(status);
            return;
        };
        if txn.record_read(byte, acked).is_err() {
            self.fatal(status);
            return;
        }
        if txn.current().map_or(true, |s| s.is_done()) {
            self.end_segment();
        } else if self.begin_receive(status) {
            self.transition(ControllerState::DataPhaseRx);
        }
    }

    fn on_generate_stop(
        &mut self,
        levels: LineLevels,
        edge: Option<ClockEdge>,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) {
        let timing = &config.timing;
        match self.stop_stage {
            StopStage::AwaitLow => {
                if edge == Some(ClockEdge::Falling) {
                    self.sda.pull_low();
                    self.arbiter.halt();
                    self.stop_stage = StopStage::AwaitHigh;
                    self.counter = 0;
                } else if !self.arbiter.is_running() {
                    // Nobody is clocking; produce one low phase ourselves.
                    self.arbiter.start();
                }
            }
            StopStage::AwaitHigh => {
                if levels.scl.is_high() {
                    self.counter += 1;
                    if self.counter >= timing.stop_setup_ticks {
                        self.sda.release();
                        self.stop_stage = StopStage::Release;
                        self.counter = 0;
                    }
                }
            }
            StopStage::Release => {
                if levels.is_idle() {
                    self.finish(status);
                } else if levels.sda.is_low() {
                    self.counter += 1;
                    if self.counter > timing.period_ticks() {
                        self.on_stuck_bus(config, status);
                    }
                }
            }
        }
    }

    fn on_stuck_bus(&mut self, config: &I2cConfig, status: &mut I2cStatus) {
        if config.capabilities.bus_recovery && self.recovery_attempts < MAX_RECOVERY_ATTEMPTS {
            self.logger.error(format_args!(
                "i2c: SDA held low, recovery attempt {}",
                self.recovery_attempts + 1
            ));
            self.enter_recovery();
        } else {
            self.give_up_stuck(status);
        }
    }

    fn enter_recovery(&mut self) {
        self.recovery_attempts += 1;
        self.recovery_pulses = 0;
        self.sda.release();
        self.arbiter.start();
        self.transition(ControllerState::BusRecovery);
    }

    fn on_bus_recovery(&mut self, levels: LineLevels, edge: Option<ClockEdge>, status: &mut I2cStatus) {
        if edge != Some(ClockEdge::Rising) {
            return;
        }
        if levels.sda.is_high() {
            self.arbiter.halt();
            self.counter = 0;
            if self.arbiter.scl_low() {
                // The arbiter already began the next low phase this tick.
                // Pulling SDA now would move it together with SCL, so
                // finish with a plain STOP after that falling edge.
                self.stop_stage = StopStage::AwaitLow;
            } else {
                // SCL stays high: frame a START/STOP pair. The START resets
                // every slave state machine before the STOP frees the bus.
                self.sda.pull_low();
                self.stop_stage = StopStage::AwaitHigh;
            }
            self.transition(ControllerState::GenerateStop);
            return;
        }
        self.recovery_pulses += 1;
        if self.recovery_pulses >= RECOVERY_PULSES {
            self.give_up_stuck(status);
        }
    }

    fn give_up_stuck(&mut self, status: &mut I2cStatus) {
        self.logger.error(format_args!("i2c: bus stuck, giving up"));
        status.raise_error(Error::BusStuck, BUS_ERROR);
        self.pending_error = Some(Error::BusStuck);
        self.finish(status);
    }

    /// Terminate the transaction with `error` and leave the bus with a STOP.
    fn bus_fault(&mut self, error: Error, mask: u32, status: &mut I2cStatus) {
        self.logger
            .error(format_args!("i2c: {} in {:?}", error, self.state));
        status.raise_error(error, mask);
        self.pending_error = Some(error);
        self.arbitration.is_contending = false;
        self.begin_stop();
    }

    fn finish(&mut self, status: &mut I2cStatus) {
        let result = match self.pending_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        self.complete_transfer(result, status);
        self.sda.release();
        self.arbiter.release();
        self.recovery_attempts = 0;
        self.arbitration.is_contending = false;
        self.transition(ControllerState::Idle);
    }

    fn complete_transfer(&mut self, result: Result<(), Error>, status: &mut I2cStatus) {
        let txn = self.transaction.take();
        status.complete(CompletedTransfer {
            result,
            read_data: txn.as_ref().map(Transaction::read_data).unwrap_or_default(),
            bytes_written: txn.as_ref().map_or(0, Transaction::bytes_written),
        });
    }

    fn fatal(&mut self, status: &mut I2cStatus) {
        self.logger
            .error(format_args!("i2c: internal contract violated in {:?}", self.state));
        self.sda.release();
        self.arbiter.release();
        status.raise_error(Error::Fatal, FATAL);
        if self.transaction.is_some() {
            self.complete_transfer(Err(Error::Fatal), status);
        }
        self.transition(ControllerState::FatalError);
    }

    /// Load the shifter, enforcing the byte-boundary contract.
    fn load_byte(&mut self, byte: u8, status: &mut I2cStatus) -> bool {
        if !self.shifter.at_boundary() {
            self.fatal(status);
            return false;
        }
        self.shifter.load(byte);
        true
    }

    fn begin_receive(&mut self, status: &mut I2cStatus) -> bool {
        if !self.shifter.at_boundary() {
            self.fatal(status);
            return false;
        }
        self.shifter.begin_receive();
        true
    }

    // ---------------------------------------------------------------------
    // Slave
    // ---------------------------------------------------------------------

    fn begin_slave_frame(&mut self, repeated: bool, status: &mut I2cStatus) {
        self.target.on_transaction_start(repeated);
        self.release_slave();
        self.slave = SlaveContext {
            listening: true,
            engaged: self.slave.engaged && repeated,
            ten_bit_selected: if repeated {
                self.slave.ten_bit_selected
            } else {
                None
            },
            ..SlaveContext::default()
        };
        // Frame boundary: whatever was in flight is abandoned.
        self.shifter.begin_receive();
        self.transition(ControllerState::AwaitAddressMatch);
    }

    fn end_slave_frame(&mut self, status: &mut I2cStatus) {
        if self.slave.engaged {
            self.target.on_stop();
            status.set_slave_event(I2cSEvent::SlaveStop);
        }
        self.release_slave();
        self.slave = SlaveContext::default();
        self.transition(ControllerState::Idle);
    }

    fn release_slave(&mut self) {
        self.sda.release();
        self.arbiter.release_stretch();
    }

    fn go_passive(&mut self) {
        self.sda.release();
        self.slave.listening = false;
        self.transition(ControllerState::AwaitAddressMatch);
    }

    fn on_slave(
        &mut self,
        levels: LineLevels,
        edge: Option<ClockEdge>,
        config: &I2cConfig,
        status: &mut I2cStatus,
    ) {
        if self.slave.release_stretch {
            self.slave.release_stretch = false;
            self.arbiter.release_stretch();
        }
        if let Some(action) = self.slave.pending {
            if self.perform(action, false, status) {
                self.slave.pending = None;
                // SDA settles this tick; let SCL go on the next one.
                self.slave.release_stretch = true;
            }
            return;
        }

        match (self.state, edge) {
            (ControllerState::AwaitAddressMatch, Some(ClockEdge::Rising)) => {
                if self.slave.listening && !self.shifter.data_complete() {
                    self.shifter.shift_in(levels.sda);
                    if self.shifter.data_complete() {
                        self.decide_address(self.shifter.buffer(), config, status);
                    }
                }
            }
            (
                ControllerState::SlaveAckAddress | ControllerState::SlaveSendAck,
                Some(ClockEdge::Rising),
            ) => {
                if self.shifter.data_complete() && !self.shifter.is_complete() {
                    self.shifter.shift_in(levels.sda);
                }
            }
            (ControllerState::SlaveAckAddress, Some(ClockEdge::Falling)) => {
                if self.shifter.is_complete() {
                    self.after_address_ack(config, status);
                } else if self.shifter.data_complete() {
                    self.sda.pull_low();
                }
            }
            (ControllerState::SlaveDataRx, Some(ClockEdge::Rising)) => {
                if !self.shifter.data_complete() {
                    self.shifter.shift_in(levels.sda);
                }
            }
            (ControllerState::SlaveDataRx, Some(ClockEdge::Falling)) => {
                if self.shifter.data_complete() {
                    let byte = self.shifter.buffer();
                    status.set_received(byte);
                    status.set_slave_event(I2cSEvent::SlaveWrRecvd);
                    self.slave_action(SlaveAction::Acknowledge(byte), config, status);
                }
            }
            (ControllerState::SlaveSendAck, Some(ClockEdge::Falling)) => {
                if self.shifter.is_complete() {
                    self.sda.release();
                    if self.slave.acked && self.begin_receive(status) {
                        self.transition(ControllerState::SlaveDataRx);
                    } else if !self.slave.acked {
                        self.go_passive();
                    }
                }
            }
            (ControllerState::SlaveDataTx, Some(ClockEdge::Falling)) => {
                let bit = self.shifter.shift_out(Level::High);
                self.sda.put(bit);
                if self.shifter.is_complete() {
                    self.slave.acked = false;
                    self.transition(ControllerState::SlaveWaitAck);
                }
            }
            (ControllerState::SlaveWaitAck, Some(ClockEdge::Rising)) => {
                let acked = levels.sda.is_low();
                self.slave.acked = acked;
                self.target.on_read_ack(acked);
                status.set_slave_event(I2cSEvent::SlaveRdProc);
            }
            (ControllerState::SlaveWaitAck, Some(ClockEdge::Falling)) => {
                if self.slave.acked {
                    self.slave_action(SlaveAction::Transmit, config, status);
                } else {
                    self.go_passive();
                }
            }
            _ => {}
        }
    }

    fn decide_address(&mut self, byte: u8, config: &I2cConfig, status: &mut I2cStatus) {
        let direction = Direction::from_bit(byte);
        let ten_bit = config.slave.address_mode == AddressMode::TenBit
            && config.capabilities.ten_bit_addressing;

        let matched = if let Some(high) = self.slave.ten_bit_prefix.take() {
            let address = (u16::from(high) << 8) | u16::from(byte);
            let selected = config.slave.matches(address)
                && self.target.on_address_match(address, Direction::Write);
            if selected {
                self.slave.ten_bit_selected = Some(address);
            }
            selected.then_some(AddressMatch::Full(address, Direction::Write))
        } else if ten_bit && byte & TEN_BIT_PREFIX_MASK == TEN_BIT_PREFIX {
            let high = (byte >> 1) & 0b11;
            match (direction, self.slave.ten_bit_selected) {
                (Direction::Write, _) => config
                    .slave
                    .matches_ten_bit_prefix(high)
                    .then_some(AddressMatch::TenBitPrefix(high)),
                (Direction::Read, Some(address)) if (address >> 8) as u8 == high => self
                    .target
                    .on_address_match(address, Direction::Read)
                    .then_some(AddressMatch::Full(address, Direction::Read)),
                (Direction::Read, _) => None,
            }
        } else if byte == 0 {
            (config.capabilities.general_call
                && self.target.on_address_match(0, Direction::Write))
            .then_some(AddressMatch::Full(0, Direction::Write))
        } else if !ten_bit {
            let address = u16::from(byte >> 1);
            (config.slave.matches(address) && self.target.on_address_match(address, direction))
                .then_some(AddressMatch::Full(address, direction))
        } else {
            None
        };

        match matched {
            Some(found) => {
                if let AddressMatch::Full(_, direction) = found {
                    self.slave.engaged = true;
                    status.raise(ADDRESS_MATCH);
                    status.set_slave_event(match direction {
                        Direction::Read => I2cSEvent::SlaveRdReq,
                        Direction::Write => I2cSEvent::SlaveWrReq,
                    });
                }
                self.slave.matched = Some(found);
                self.transition(ControllerState::SlaveAckAddress);
            }
            None => {
                self.logger
                    .debug(format_args!("i2c: address byte {byte:#04x} not ours"));
                status.set_slave_event(I2cSEvent::SlaveAddrNoMatch);
                self.slave.listening = false;
            }
        }
    }

    fn after_address_ack(&mut self, config: &I2cConfig, status: &mut I2cStatus) {
        self.sda.release();
        match self.slave.matched.take() {
            Some(AddressMatch::TenBitPrefix(high)) => {
                self.slave.ten_bit_prefix = Some(high);
                if self.begin_receive(status) {
                    self.transition(ControllerState::AwaitAddressMatch);
                }
            }
            Some(AddressMatch::Full(_, Direction::Write)) => {
                if self.begin_receive(status) {
                    self.transition(ControllerState::SlaveDataRx);
                }
            }
            Some(AddressMatch::Full(_, Direction::Read)) => {
                self.slave_action(SlaveAction::Transmit, config, status);
            }
            None => self.go_passive(),
        }
    }

    /// Run `action` now; if the target is busy, stretch SCL and retry on
    /// every following tick.
    fn slave_action(&mut self, action: SlaveAction, config: &I2cConfig, status: &mut I2cStatus) {
        let may_stall = config.capabilities.clock_stretching;
        if !self.perform(action, !may_stall, status) {
            self.arbiter.request_stretch();
            self.slave.pending = Some(action);
        }
    }

    /// Returns `false` if the target asked to wait. With `force`, a busy
    /// target is answered with a NACK (writes) or an idle-high byte (reads).
    fn perform(&mut self, action: SlaveAction, force: bool, status: &mut I2cStatus) -> bool {
        match action {
            SlaveAction::Transmit => {
                let byte = match self.target.on_read() {
                    ReadResponse::Byte(byte) => byte,
                    ReadResponse::Busy if force => 0xFF,
                    ReadResponse::Busy => return false,
                };
                if self.load_byte(byte, status) {
                    let bit = self.shifter.shift_out(Level::High);
                    self.sda.put(bit);
                    self.transition(ControllerState::SlaveDataTx);
                }
                true
            }
            SlaveAction::Acknowledge(byte) => {
                let acked = match self.target.on_write(byte) {
                    WriteResponse::Ack => true,
                    WriteResponse::Nack => false,
                    WriteResponse::Busy if force => false,
                    WriteResponse::Busy => return false,
                };
                self.slave.acked = acked;
                self.sda.put(if acked { Level::Low } else { Level::High });
                self.transition(ControllerState::SlaveSendAck);
                true
            }
        }
    }
}
