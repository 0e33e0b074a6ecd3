// Licensed under the Apache-2.0 license

//! The unit of master work: one target address and up to [`MAX_SEGMENTS`]
//! segments, each introduced by a (repeated) START.

use crate::i2c::common::{Error, MAX_SEVEN_BIT_ADDRESS, MAX_TEN_BIT_ADDRESS};
use crate::i2c::status::MAX_TRANSFER_LEN;
use heapless::Vec;

pub const MAX_SEGMENTS: usize = 4;
pub const MAX_SEGMENT_LEN: usize = 256;

/// Reserved prefix of the first byte of a 10-bit address header.
pub const TEN_BIT_PREFIX: u8 = 0b1111_0000;
/// Mask selecting the `11110` prefix bits of an address byte.
pub const TEN_BIT_PREFIX_MASK: u8 = 0b1111_1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    /// R/W bit value in the address byte.
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Direction::Write => 0,
            Direction::Read => 1,
        }
    }

    #[must_use]
    pub const fn from_bit(bit: u8) -> Self {
        if bit & 1 == 0 {
            Direction::Write
        } else {
            Direction::Read
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Address {
    SevenBit(u8),
    TenBit(u16),
}

/// One byte of an address header. `restart` asks for a repeated START to be
/// generated before it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeaderByte {
    pub byte: u8,
    pub restart: bool,
}

impl Address {
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address does not fit its width.
    pub fn validate(self) -> Result<Self, Error> {
        let fits = match self {
            Address::SevenBit(a) => u16::from(a) <= MAX_SEVEN_BIT_ADDRESS,
            Address::TenBit(a) => a <= MAX_TEN_BIT_ADDRESS,
        };
        if fits {
            Ok(self)
        } else {
            Err(Error::InvalidAddress)
        }
    }

    #[must_use]
    pub const fn is_ten_bit(self) -> bool {
        matches!(self, Address::TenBit(_))
    }

    /// Bytes clocked out after a START to select this target.
    ///
    /// 10-bit reads are addressed for write first, then switched to read
    /// with a repeated START and the prefix byte alone.
    #[must_use]
    pub fn header(self, direction: Direction) -> Vec<HeaderByte, 3> {
        let mut header = Vec::new();
        let mut push = |byte: u8, restart: bool| {
            // Never more than three entries.
            let _ = header.push(HeaderByte { byte, restart });
        };
        match self {
            Address::SevenBit(a) => push((a << 1) | direction.bit(), false),
            Address::TenBit(a) => {
                let prefix = TEN_BIT_PREFIX | (((a >> 8) as u8 & 0b11) << 1);
                push(prefix, false);
                push((a & 0xFF) as u8, false);
                if direction == Direction::Read {
                    push(prefix | Direction::Read.bit(), true);
                }
            }
        }
        header
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    direction: Direction,
    /// Payload for writes, received bytes for reads.
    data: Vec<u8, MAX_SEGMENT_LEN>,
    length: usize,
    /// Acknowledge bit of every byte transferred so far, `true` = ACK.
    acks: Vec<bool, MAX_SEGMENT_LEN>,
}

impl Segment {
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn acks(&self) -> &[bool] {
        &self.acks
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.acks.len()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.position() >= self.length
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    address: Address,
    segments: Vec<Segment, MAX_SEGMENTS>,
    cursor: usize,
}

impl Transaction {
    /// Empty transaction; add segments with [`push_write`](Self::push_write)
    /// and [`push_read`](Self::push_read).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address does not fit its width.
    pub fn new(address: Address) -> Result<Self, Error> {
        Ok(Self {
            address: address.validate()?,
            segments: Vec::new(),
            cursor: 0,
        })
    }

    /// # Errors
    ///
    /// See [`new`](Self::new) and [`push_write`](Self::push_write).
    pub fn write(address: Address, bytes: &[u8]) -> Result<Self, Error> {
        let mut txn = Self::new(address)?;
        txn.push_write(bytes)?;
        Ok(txn)
    }

    /// # Errors
    ///
    /// See [`new`](Self::new) and [`push_read`](Self::push_read).
    pub fn read(address: Address, len: usize) -> Result<Self, Error> {
        let mut txn = Self::new(address)?;
        txn.push_read(len)?;
        Ok(txn)
    }

    /// Write then read with a repeated START in between.
    ///
    /// # Errors
    ///
    /// See [`push_write`](Self::push_write) and [`push_read`](Self::push_read).
    pub fn write_read(address: Address, bytes: &[u8], len: usize) -> Result<Self, Error> {
        let mut txn = Self::write(address, bytes)?;
        txn.push_read(len)?;
        Ok(txn)
    }

    /// Append a write segment. An empty write only probes the address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferOverflow`] if the payload or the segment count
    /// exceeds its limit.
    pub fn push_write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let data = Vec::from_slice(bytes).map_err(|()| Error::BufferOverflow)?;
        self.push_segment(Segment {
            direction: Direction::Write,
            length: data.len(),
            data,
            acks: Vec::new(),
        })
    }

    /// Append a read segment of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for a zero-length read: the master must
    /// clock at least one byte after a read address. Returns
    /// [`Error::BufferOverflow`] if the reads of this transaction would not
    /// fit a completed transfer, or the segment count exceeds its limit.
    pub fn push_read(&mut self, len: usize) -> Result<(), Error> {
        if len == 0 {
            return Err(Error::Unsupported);
        }
        if len > MAX_SEGMENT_LEN || self.total_read_len() + len > MAX_TRANSFER_LEN {
            return Err(Error::BufferOverflow);
        }
        self.push_segment(Segment {
            direction: Direction::Read,
            data: Vec::new(),
            length: len,
            acks: Vec::new(),
        })
    }

    fn push_segment(&mut self, segment: Segment) -> Result<(), Error> {
        self.segments
            .push(segment)
            .map_err(|_| Error::BufferOverflow)
    }

    fn total_read_len(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.direction == Direction::Read)
            .map(Segment::len)
            .sum()
    }

    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn current(&self) -> Option<&Segment> {
        self.segments.get(self.cursor)
    }

    #[must_use]
    pub const fn segment_index(&self) -> usize {
        self.cursor
    }

    /// Address header for the current segment.
    #[must_use]
    pub fn header(&self) -> Vec<HeaderByte, 3> {
        self.current()
            .map(|segment| self.address.header(segment.direction))
            .unwrap_or_default()
    }

    /// Next byte to transmit in the current write segment.
    #[must_use]
    pub fn next_write_byte(&self) -> Option<u8> {
        let segment = self.current()?;
        match segment.direction {
            Direction::Write => segment.data.get(segment.position()).copied(),
            Direction::Read => None,
        }
    }

    /// Record the acknowledge bit of the byte just written.
    pub fn record_write(&mut self, acked: bool) {
        if let Some(segment) = self.segments.get_mut(self.cursor) {
            let _ = segment.acks.push(acked);
        }
    }

    /// The byte about to be read is the last of the current read segment.
    #[must_use]
    pub fn is_last_read_byte(&self) -> bool {
        self.current()
            .is_some_and(|s| s.direction == Direction::Read && s.position() + 1 >= s.length)
    }

    /// Store a received byte and the acknowledge bit driven for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferOverflow`] if the segment already holds its
    /// requested length.
    pub fn record_read(&mut self, byte: u8, acked: bool) -> Result<(), Error> {
        let segment = self
            .segments
            .get_mut(self.cursor)
            .ok_or(Error::BufferOverflow)?;
        if segment.direction != Direction::Read || segment.is_done() {
            return Err(Error::BufferOverflow);
        }
        segment.data.push(byte).map_err(|_| Error::BufferOverflow)?;
        segment.acks.push(acked).map_err(|_| Error::BufferOverflow)
    }

    /// Move to the next segment. Returns `false` when none is left.
    pub fn advance(&mut self) -> bool {
        if self.cursor < self.segments.len() {
            self.cursor += 1;
        }
        self.cursor < self.segments.len()
    }

    /// Every read byte across the read segments, in order.
    #[must_use]
    pub fn read_data(&self) -> Vec<u8, MAX_TRANSFER_LEN> {
        let mut out = Vec::new();
        for segment in self.segments.iter().filter(|s| s.direction == Direction::Read) {
            // Total read length is bounded when the segment is pushed.
            let _ = out.extend_from_slice(&segment.data);
        }
        out
    }

    /// Written bytes that were acknowledged.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.direction == Direction::Write)
            .map(|s| s.acks.iter().filter(|&&ack| ack).count())
            .sum()
    }
}
