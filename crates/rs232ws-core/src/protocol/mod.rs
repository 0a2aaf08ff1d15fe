//! Serial-side wire protocol.
//!
//! The serial line carries newline (`\n`) delimited text in both directions.
//! Inbound bytes are framed by [`lines::LineBuffer`]; outbound messages are
//! terminated with [`LINE_TERMINATOR`] by the serial endpoint.

pub mod lines;

pub use lines::{LineBuffer, LINE_TERMINATOR, MAX_LINE_BYTES};
