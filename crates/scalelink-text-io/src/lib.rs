//! Byte-to-telegram pipeline for line-oriented scale indicators.
//!
//! Bytes from a channel become text, text becomes lines, and lines become
//! telegrams. One session owns the channel at a time.
//!
//! # Architecture
//!
//! - [`framer`] -- streaming UTF-8 decoding and delimiter-based line reassembly
//! - [`decoder`] -- rule-table telegram decoding
//! - [`io`] -- channel ownership, the cancellable deadline wait, and line reading

pub mod decoder;
pub mod framer;
pub mod io;

pub use decoder::{BareDigits, Decoded, DecoderConfig, TelegramDecoder};
pub use framer::{LineFramer, TextDecoder};
pub use io::{ChannelSession, LastSeen, LineReader, ReadOutcome, Wait, race};
