// Licensed under the Apache-2.0 license

//! Crate-wide logging plumbing.
//!
//! Every engine type carries a logger type parameter that defaults to
//! [`NoOpLogger`], so logging compiles away unless a real sink is plugged in.

use core::fmt;

/// Minimal logging sink used by the protocol engine.
pub trait Logger {
    fn debug(&mut self, args: fmt::Arguments<'_>);
    fn error(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}
    fn error(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Logger writing one line per record to any `embedded_io::Write` sink,
/// typically a UART.
///
/// Write errors are dropped: a full or broken log sink must never stall the
/// bus.
pub struct IoLogger<W: embedded_io::Write> {
    writer: W,
}

impl<W: embedded_io::Write> IoLogger<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit(&mut self, level: &str, args: fmt::Arguments<'_>) {
        let _ = write!(self.writer, "[{level}] {args}\r\n");
    }
}

impl<W: embedded_io::Write> Logger for IoLogger<W> {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.emit("DEBUG", args);
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.emit("ERROR", args);
    }
}
