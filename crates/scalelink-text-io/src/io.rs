//! Channel ownership and line reading.
//!
//! [`ChannelSession`] is the single owner of a channel handle. Every
//! configuration change goes through [`ChannelSession::reopen`], which
//! always closes first, so two configurations are never layered on the
//! same device.
//!
//! [`LineReader`] drives a [`TextDecoder`] and [`LineFramer`] over a
//! session. Every read is a [`race`] between data, a deadline and a
//! cancellation token; losing the race drops the pending read.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scalelink_core::error::{Error, Result};
use scalelink_core::transport::{Channel, Signals};
use scalelink_core::types::{ChannelId, Delimiter, LinkConfig};

use crate::framer::{LineFramer, TextDecoder};

/// Pause after closing before the next open, so a failing device is not
/// hammered in a tight loop.
pub const DEFAULT_GUARD_PAUSE: Duration = Duration::from_millis(50);

/// Bytes requested per channel read.
pub const READ_CHUNK: usize = 256;

/// Per-call timeout passed to [`Channel::receive`]; the overall deadline
/// is enforced by [`race`].
const RECEIVE_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Cancellable wait
// ---------------------------------------------------------------------------

/// Outcome of a [`race`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait<T> {
    Ready(T),
    Elapsed,
    Cancelled,
}

/// Wait for `fut`, giving up at `deadline` or when `cancel` fires.
///
/// Cancellation wins ties, then the future, then the deadline. A losing
/// future is dropped; for channel reads that discards the pending read.
pub async fn race<F: Future>(
    deadline: Instant,
    cancel: &CancellationToken,
    fut: F,
) -> Wait<F::Output> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Wait::Cancelled,
        out = fut => Wait::Ready(out),
        _ = tokio::time::sleep_until(deadline) => Wait::Elapsed,
    }
}

// ---------------------------------------------------------------------------
// LastSeen
// ---------------------------------------------------------------------------

/// Shared "last valid telegram" timestamp. Only ever moves forward.
///
/// Clones share the same timestamp, so a watchdog task can read it while
/// the read loop updates it.
#[derive(Debug, Clone)]
pub struct LastSeen {
    origin: Instant,
    millis: Arc<AtomicU64>,
}

impl LastSeen {
    /// Start a new timeline; "last seen" is now.
    pub fn new() -> Self {
        LastSeen {
            origin: Instant::now(),
            millis: Arc::new(AtomicU64::new(0)),
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.millis.fetch_max(self.now_millis(), Ordering::AcqRel);
    }

    /// Time since the last [`touch()`](Self::touch) (or creation).
    pub fn elapsed(&self) -> Duration {
        let last = self.millis.load(Ordering::Acquire);
        Duration::from_millis(self.now_millis().saturating_sub(last))
    }

    /// Milliseconds from creation to the last touch.
    pub fn offset_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

impl Default for LastSeen {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ChannelSession
// ---------------------------------------------------------------------------

/// Sole owner of one channel handle and its active configuration.
pub struct ChannelSession {
    channel: Box<dyn Channel>,
    config: Option<LinkConfig>,
    last_seen: LastSeen,
    open: bool,
    guard_pause: Duration,
    signals: Option<Signals>,
}

impl ChannelSession {
    pub fn new(channel: Box<dyn Channel>) -> Self {
        ChannelSession {
            channel,
            config: None,
            last_seen: LastSeen::new(),
            open: false,
            guard_pause: DEFAULT_GUARD_PAUSE,
            signals: None,
        }
    }

    /// Override the pause between close and reopen.
    pub fn with_guard_pause(mut self, pause: Duration) -> Self {
        self.guard_pause = pause;
        self
    }

    /// Drive the control lines to `signals` after every successful open.
    pub fn with_signals(mut self, signals: Option<Signals>) -> Self {
        self.signals = signals;
        self
    }

    pub fn id(&self) -> &ChannelId {
        self.channel.id()
    }

    /// The configuration the channel is open with, if any.
    pub fn config(&self) -> Option<&LinkConfig> {
        self.config.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// A handle onto this session's "last seen" timestamp.
    pub fn last_seen(&self) -> LastSeen {
        self.last_seen.clone()
    }

    /// Close any previous configuration, pause, then open with `config`.
    ///
    /// On failure the session is left closed.
    pub async fn reopen(&mut self, config: LinkConfig) -> Result<()> {
        self.close().await?;
        tokio::time::sleep(self.guard_pause).await;

        debug!(port = %self.id(), config = %config, "opening channel");
        self.channel.open(&config).await?;
        self.open = true;
        self.config = Some(config);

        if let Some(signals) = self.signals {
            if let Err(e) = self.channel.set_signals(signals).await {
                warn!(port = %self.id(), error = %e, "failed to set control lines");
            }
        }
        Ok(())
    }

    /// Close the channel. Safe to call repeatedly or when never opened.
    pub async fn close(&mut self) -> Result<()> {
        let was_open = self.open || self.channel.is_open();
        self.open = false;
        self.config = None;
        if was_open {
            debug!(port = %self.id(), "closing channel");
            self.channel.close().await?;
        }
        Ok(())
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        self.channel.send(data).await
    }

    pub async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        self.channel.receive(buf, timeout).await
    }

    /// Give up ownership of the channel handle.
    pub fn into_channel(self) -> Box<dyn Channel> {
        self.channel
    }
}

// ---------------------------------------------------------------------------
// LineReader
// ---------------------------------------------------------------------------

/// Result of waiting for one line.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A framed line, delimiter stripped, not yet trimmed.
    Line(String),
    /// The deadline passed with no complete line.
    Elapsed,
    Cancelled,
    /// The channel signalled end-of-stream and every buffered line has
    /// been returned.
    EndOfStream,
    /// The channel failed.
    Failed(Error),
}

/// Byte-to-line pipeline over a [`ChannelSession`]. One per channel open.
#[derive(Debug)]
pub struct LineReader {
    text: TextDecoder,
    framer: LineFramer,
    ready: VecDeque<String>,
    ended: bool,
}

impl LineReader {
    pub fn new(delimiter: Delimiter) -> Self {
        LineReader {
            text: TextDecoder::new(),
            framer: LineFramer::new(delimiter),
            ready: VecDeque::new(),
            ended: false,
        }
    }

    /// Wait for the next line until `deadline` or cancellation.
    pub async fn next_line(
        &mut self,
        session: &mut ChannelSession,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.ready.pop_front() {
                return ReadOutcome::Line(line);
            }
            if self.ended {
                return ReadOutcome::EndOfStream;
            }

            match race(deadline, cancel, session.receive(&mut buf, RECEIVE_POLL)).await {
                Wait::Ready(Ok(0)) => {
                    debug!(port = %session.id(), "end of stream");
                    let rest = self.flush();
                    self.ready.extend(rest);
                    self.ended = true;
                }
                Wait::Ready(Ok(n)) => self.feed(&buf[..n]),
                Wait::Ready(Err(Error::Timeout)) => {}
                Wait::Ready(Err(e)) => return ReadOutcome::Failed(e),
                Wait::Elapsed => return ReadOutcome::Elapsed,
                Wait::Cancelled => return ReadOutcome::Cancelled,
            }
        }
    }

    /// Push raw bytes through the decoder and framer.
    pub fn feed(&mut self, bytes: &[u8]) {
        let text = self.text.decode(bytes);
        if !text.is_empty() {
            self.ready.extend(self.framer.push(&text));
        }
    }

    /// Teardown: return every buffered line, including an unterminated
    /// tail, and leave the reader empty.
    pub fn flush(&mut self) -> Vec<String> {
        let mut lines: Vec<String> = self.ready.drain(..).collect();
        let tail = self.text.finish();
        if !tail.is_empty() {
            lines.extend(self.framer.push(&tail));
        }
        lines.extend(self.framer.finish());
        lines
    }
}
