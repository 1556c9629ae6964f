//! Error types for scalelink.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Most of these are recovered locally:
//! a rejected link configuration advances the parameter search, a lost
//! channel sends the supervisor back to idle. Only the CLI ever surfaces
//! them to a user.

use crate::types::LinkConfig;

/// The error type for all scalelink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel refused to open with the given link parameters.
    ///
    /// Recovered by moving on to the next candidate configuration.
    #[error("configuration {config} rejected: {reason}")]
    ConfigRejected {
        /// The configuration that was refused.
        config: LinkConfig,
        /// Driver-level description of the refusal.
        reason: String,
    },

    /// A transport-level error (serial port, USB adapter).
    #[error("transport error: {0}")]
    Transport(String),

    /// A timed wait elapsed before any data arrived.
    #[error("timeout waiting for data")]
    Timeout,

    /// The channel is not open.
    #[error("not connected")]
    NotConnected,

    /// The channel failed during a read or write.
    #[error("connection lost")]
    ConnectionLost,

    /// The channel signalled end-of-stream.
    #[error("end of stream")]
    EndOfStream,

    /// An invalid parameter was passed to a builder or operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The authorization collaborator failed to list or grant channels.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the channel is gone for good and the
    /// session holding it must be torn down.
    pub fn is_channel_lost(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost | Error::EndOfStream | Error::NotConnected | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
