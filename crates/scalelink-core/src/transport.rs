//! Channel and authorization traits.
//!
//! The [`Channel`] trait abstracts over the physical duplex link to a scale
//! indicator. Implementations exist for serial ports (`scalelink-transport`)
//! and for simulated devices (`MockChannel` in `scalelink-test-harness`).
//!
//! Detection and reading operate on a `Channel` rather than directly on a
//! serial port, so the whole search and supervision logic can be driven
//! deterministically in tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{ChannelId, LinkConfig};

/// Modem control line levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    /// Data Terminal Ready.
    pub dtr: bool,
    /// Request To Send.
    pub rts: bool,
}

impl Signals {
    /// Both lines asserted. Some indicators draw power from DTR/RTS.
    pub const ASSERTED: Signals = Signals {
        dtr: true,
        rts: true,
    };
}

/// Asynchronous byte-level duplex channel to a scale.
///
/// A channel is opened with exactly one [`LinkConfig`] at a time. Opening
/// with a different configuration requires a prior [`close()`](Channel::close);
/// callers go through `ChannelSession` in `scalelink-text-io`, which enforces
/// this.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable identity of the underlying device.
    fn id(&self) -> &ChannelId;

    /// Open the channel with the given link parameters.
    ///
    /// Returns [`Error::ConfigRejected`](crate::error::Error::ConfigRejected)
    /// if the device or driver refuses the parameters.
    async fn open(&mut self, config: &LinkConfig) -> Result<()>;

    /// Write raw bytes.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read bytes into the provided buffer.
    ///
    /// Waits up to `timeout` for data. Returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives before the deadline, and `Ok(0)` when the device
    /// signals end-of-stream.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the channel. Idempotent: closing a closed channel is `Ok(())`.
    async fn close(&mut self) -> Result<()>;

    /// Drive the modem control lines. Channels without control lines
    /// ignore this.
    async fn set_signals(&mut self, _signals: Signals) -> Result<()> {
        Ok(())
    }

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

/// Source of channels the core is permitted to open.
///
/// On some platforms access to a serial device must be granted by the user;
/// [`request_authorization()`](Authorizer::request_authorization) is only
/// ever called in response to an explicit external gesture.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Channels that are already authorized, in preference order.
    async fn list_authorized(&mut self) -> Result<Vec<Box<dyn Channel>>>;

    /// Ask for access to one more channel. `Ok(None)` means the request
    /// was declined or nothing new is available.
    async fn request_authorization(&mut self) -> Result<Option<Box<dyn Channel>>>;
}
