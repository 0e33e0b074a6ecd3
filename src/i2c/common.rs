// Licensed under the Apache-2.0 license

//! Common types for the I2C protocol engine.
//!
//! This module provides the configuration inputs the engine reads every tick,
//! the error taxonomy it reports, and the slave-side event codes.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use fugit::HertzU32;
use heapless::Vec;

/// Upper bound on local slave addresses a single engine answers to.
pub const MAX_SLAVE_ADDRESSES: usize = 2;

/// Largest valid 7-bit address.
pub const MAX_SEVEN_BIT_ADDRESS: u16 = 0x7F;

/// Largest valid 10-bit address.
pub const MAX_TEN_BIT_ADDRESS: u16 = 0x3FF;

/// Nominal bus rates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub const fn hz(self) -> u32 {
        self as u32
    }

    /// Share of the SCL period spent low, in percent. Standard mode is close
    /// to symmetric (4.7 µs / 4.0 µs); the faster modes need roughly twice as
    /// much low time as high time.
    #[must_use]
    pub const fn low_share_percent(self) -> u32 {
        match self {
            I2cSpeed::Standard => 54,
            I2cSpeed::Fast | I2cSpeed::FastPlus => 66,
        }
    }
}

/// Which halves of the protocol this engine takes part in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Master,
    Slave,
    Dual,
}

impl Role {
    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(self, Role::Master | Role::Dual)
    }

    #[must_use]
    pub const fn is_slave(self) -> bool {
        matches!(self, Role::Slave | Role::Dual)
    }
}

/// Width of the local slave address(es).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    SevenBit,
    TenBit,
}

/// Bus timing, in engine ticks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    /// Ticks SCL is held low by this master per bit.
    pub scl_low_ticks: u32,
    /// Ticks SCL is left released (high) per bit.
    pub scl_high_ticks: u32,
    /// Ticks SDA stays low with SCL high after a START before the first clock.
    pub start_hold_ticks: u32,
    /// Ticks SCL is high before SDA is released for a STOP.
    pub stop_setup_ticks: u32,
    /// Idle ticks required after a STOP before this master may START.
    pub bus_free_ticks: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scl_low_ticks: 4,
            scl_high_ticks: 4,
            start_hold_ticks: 4,
            stop_setup_ticks: 4,
            bus_free_ticks: 4,
        }
    }
}

impl TimingConfig {
    /// Derive half-periods for `speed` when the engine is ticked at
    /// `tick_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::RateUnachievable`] if the tick rate is
    /// too slow to give SCL at least two low ticks and one high tick.
    pub fn for_speed(speed: I2cSpeed, tick_rate: HertzU32) -> Result<Self, ConfigurationError> {
        let period = tick_rate.raw() / speed.hz();
        if period < 3 {
            return Err(ConfigurationError::RateUnachievable);
        }
        let low = (period * speed.low_share_percent() / 100).max(2);
        let high = (period - low).max(1);
        Ok(Self {
            scl_low_ticks: low,
            scl_high_ticks: high,
            start_hold_ticks: high,
            stop_setup_ticks: high,
            bus_free_ticks: low,
        })
    }

    /// Ticks per SCL period when nobody stretches.
    #[must_use]
    pub const fn period_ticks(&self) -> u32 {
        self.scl_low_ticks.saturating_add(self.scl_high_ticks)
    }

    /// Resulting SCL rate for a given tick rate.
    #[must_use]
    pub fn bus_frequency(&self, tick_rate: HertzU32) -> HertzU32 {
        HertzU32::from_raw(tick_rate.raw() / self.period_ticks().max(1))
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.scl_low_ticks < 2 {
            return Err(ConfigurationError::LowPeriodTooShort);
        }
        if self.scl_high_ticks == 0 {
            return Err(ConfigurationError::HighPeriodTooShort);
        }
        if self.start_hold_ticks == 0 || self.stop_setup_ticks == 0 {
            return Err(ConfigurationError::SetupTimeTooShort);
        }
        Ok(())
    }
}

/// Runtime capability switches, read at the start of every tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Compare every driven DATA bit against the bus.
    pub multi_master: bool,
    /// Let the slave hold SCL low while its target is busy.
    pub clock_stretching: bool,
    pub ten_bit_addressing: bool,
    /// Answer writes to address 0.
    pub general_call: bool,
    /// Clock a stuck slave free instead of giving up on a failed STOP.
    pub bus_recovery: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            multi_master: true,
            clock_stretching: true,
            ten_bit_addressing: true,
            general_call: false,
            bus_recovery: true,
        }
    }
}

/// Slave-side addressing.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SlaveConfig {
    pub addresses: Vec<u16, MAX_SLAVE_ADDRESSES>,
    pub address_mode: AddressMode,
}

impl SlaveConfig {
    /// `address` is one of ours in the configured width.
    #[must_use]
    pub fn matches(&self, address: u16) -> bool {
        self.addresses.iter().any(|&a| a == address)
    }

    /// Some configured 10-bit address carries these two high bits.
    #[must_use]
    pub fn matches_ten_bit_prefix(&self, high_bits: u8) -> bool {
        self.address_mode == AddressMode::TenBit
            && self
                .addresses
                .iter()
                .any(|&a| (a >> 8) as u8 == high_bits & 0b11)
    }
}

/// Configuration bank consumed by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    pub enabled: bool,
    pub role: Role,
    pub timing: TimingConfig,
    pub slave: SlaveConfig,
    pub capabilities: Capabilities,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            role: Role::Master,
            timing: TimingConfig::default(),
            slave: SlaveConfig::default(),
            capabilities: Capabilities::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    LowPeriodTooShort,
    HighPeriodTooShort,
    SetupTimeTooShort,
    RateUnachievable,
    InvalidSlaveAddress,
    TooManySlaveAddresses,
    TenBitDisabled,
    NoSlaveAddress,
}

pub struct I2cConfigBuilder {
    enabled: bool,
    role: Role,
    timing: Option<TimingConfig>,
    speed: Option<(I2cSpeed, HertzU32)>,
    slave_addresses: Vec<u16, MAX_SLAVE_ADDRESSES>,
    address_overflow: bool,
    address_mode: AddressMode,
    capabilities: Capabilities,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            role: Role::Master,
            timing: None,
            speed: None,
            slave_addresses: Vec::new(),
            address_overflow: false,
            address_mode: AddressMode::SevenBit,
            capabilities: Capabilities::default(),
        }
    }
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
    #[must_use]
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }
    /// Derive the timing from a nominal speed. An explicit
    /// [`timing`](Self::timing) wins over this.
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed, tick_rate: HertzU32) -> Self {
        self.speed = Some((speed, tick_rate));
        self
    }
    #[must_use]
    pub fn slave_address(mut self, address: u16) -> Self {
        if self.slave_addresses.push(address).is_err() {
            self.address_overflow = true;
        }
        self
    }
    #[must_use]
    pub fn address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode = mode;
        self
    }
    #[must_use]
    pub fn multi_master(mut self, enabled: bool) -> Self {
        self.capabilities.multi_master = enabled;
        self
    }
    #[must_use]
    pub fn clock_stretching(mut self, enabled: bool) -> Self {
        self.capabilities.clock_stretching = enabled;
        self
    }
    #[must_use]
    pub fn ten_bit_addressing(mut self, enabled: bool) -> Self {
        self.capabilities.ten_bit_addressing = enabled;
        self
    }
    #[must_use]
    pub fn general_call(mut self, enabled: bool) -> Self {
        self.capabilities.general_call = enabled;
        self
    }
    #[must_use]
    pub fn bus_recovery(mut self, enabled: bool) -> Self {
        self.capabilities.bus_recovery = enabled;
        self
    }

    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the timing is too tight for the
    /// bit protocol, or the slave addressing is inconsistent with the role
    /// and capabilities.
    pub fn build(self) -> Result<I2cConfig, ConfigurationError> {
        let timing = match (self.timing, self.speed) {
            (Some(timing), _) => timing,
            (None, Some((speed, tick_rate))) => TimingConfig::for_speed(speed, tick_rate)?,
            (None, None) => TimingConfig::default(),
        };
        timing.validate()?;

        if self.address_overflow {
            return Err(ConfigurationError::TooManySlaveAddresses);
        }
        let limit = match self.address_mode {
            AddressMode::SevenBit => MAX_SEVEN_BIT_ADDRESS,
            AddressMode::TenBit => {
                if !self.capabilities.ten_bit_addressing {
                    return Err(ConfigurationError::TenBitDisabled);
                }
                MAX_TEN_BIT_ADDRESS
            }
        };
        if self.slave_addresses.iter().any(|&a| a > limit) {
            return Err(ConfigurationError::InvalidSlaveAddress);
        }
        if self.role.is_slave()
            && self.slave_addresses.is_empty()
            && !self.capabilities.general_call
        {
            return Err(ConfigurationError::NoSlaveAddress);
        }

        Ok(I2cConfig {
            enabled: self.enabled,
            role: self.role,
            timing,
            slave: SlaveConfig {
                addresses: self.slave_addresses,
                address_mode: self.address_mode,
            },
            capabilities: self.capabilities,
        })
    }
}

/// Errors surfaced by the protocol engine and its front ends.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The addressed device, or the receiver of a data byte, left SDA high
    /// during the acknowledge slot.
    NoAcknowledge(NoAcknowledgeSource),
    /// A driven DATA bit read back differently from the bus.
    ArbitrationLost,
    /// DATA moved while the clock was not stably low, or a START/STOP
    /// appeared in the middle of a byte.
    IllegalBusTransition,
    /// SDA stayed low through bus recovery.
    BusStuck,
    /// A transaction is already active.
    Busy,
    Disabled,
    /// The configured role or capabilities do not allow the request.
    Unsupported,
    InvalidAddress,
    BufferOverflow,
    /// The policy layer gave up waiting for the engine.
    Timeout,
    /// Internal contract violation; only a reset clears it.
    Fatal,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match *self {
            Error::NoAcknowledge(source) => ErrorKind::NoAcknowledge(source),
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::IllegalBusTransition | Error::BusStuck => ErrorKind::Bus,
            Error::BufferOverflow => ErrorKind::Overrun,
            Error::Busy
            | Error::Disabled
            | Error::Unsupported
            | Error::InvalidAddress
            | Error::Timeout
            | Error::Fatal => ErrorKind::Other,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NoAcknowledge(source) => write!(f, "no acknowledge ({source:?})"),
            Error::ArbitrationLost => f.write_str("arbitration lost"),
            Error::IllegalBusTransition => f.write_str("illegal bus transition"),
            Error::BusStuck => f.write_str("bus stuck low"),
            Error::Busy => f.write_str("transaction already active"),
            Error::Disabled => f.write_str("controller disabled"),
            Error::Unsupported => f.write_str("not supported by role or capabilities"),
            Error::InvalidAddress => f.write_str("invalid address"),
            Error::BufferOverflow => f.write_str("buffer overflow"),
            Error::Timeout => f.write_str("timed out"),
            Error::Fatal => f.write_str("internal consistency violation"),
        }
    }
}

/// Slave-side events, reported to the status bank and the log.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum I2cSEvent {
    /// Addressed for a read.
    SlaveRdReq,
    /// Addressed for a write.
    SlaveWrReq,
    /// A byte was sent to the master.
    SlaveRdProc,
    /// A byte was received from the master.
    SlaveWrRecvd,
    SlaveStop,
    /// An address frame for somebody else; the slave stays passive.
    SlaveAddrNoMatch,
}
