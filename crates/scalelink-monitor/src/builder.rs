//! SupervisorBuilder -- fluent builder for a running [`SupervisorHandle`].
//!
//! Collects probe, loopback and read settings before the supervisor task
//! is spawned.
//!
//! # Example
//!
//! ```no_run
//! use scalelink_monitor::builder::SupervisorBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> scalelink_core::Result<()> {
//! let handle = SupervisorBuilder::new()
//!     .probe_window(Duration::from_millis(800))
//!     .smoothing(5)
//!     .build()
//!     .await?;
//! let mut events = handle.subscribe();
//! # let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use scalelink_core::diag::DEFAULT_LOG_CAPACITY;
use scalelink_core::error::{Error, Result};
use scalelink_core::transport::{Authorizer, Signals};
use scalelink_core::types::LinkConfig;
use scalelink_detect::loopback::{
    DEFAULT_ATTEMPTS, DEFAULT_READ_WINDOW, DEFAULT_RETRY_PAUSE, LoopbackTester,
    default_loopback_config,
};
use scalelink_detect::probe::{DEFAULT_PROBE_WINDOW, ProbeEngine};
use scalelink_detect::space::ParameterSpace;
use scalelink_text_io::decoder::{DecoderConfig, TelegramDecoder};
use scalelink_text_io::io::DEFAULT_GUARD_PAUSE;
use scalelink_transport::ports::{PortFilter, SerialAuthorizer};

use crate::reader::{DEFAULT_IDLE_TIMEOUT, DEFAULT_WATCHDOG_POLL, ReadSettings};
use crate::supervisor::{self, SupervisorHandle, SupervisorParts};

const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_INPUT_CAPACITY: usize = 32;

/// Fluent builder for a supervisor.
///
/// Every setting has a default, so the simplest usage is:
///
/// ```ignore
/// let handle = SupervisorBuilder::new().build().await?;
/// ```
pub struct SupervisorBuilder {
    space: ParameterSpace,
    decoder: DecoderConfig,
    probe_window: Duration,
    loopback_config: LinkConfig,
    loopback_attempts: u32,
    loopback_window: Duration,
    loopback_pause: Duration,
    idle_timeout: Duration,
    watchdog_poll: Duration,
    smoothing: Option<usize>,
    guard_pause: Duration,
    signals: Option<Signals>,
    port_filter: PortFilter,
    event_capacity: usize,
    log_capacity: usize,
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        SupervisorBuilder {
            space: ParameterSpace::default(),
            decoder: DecoderConfig::default(),
            probe_window: DEFAULT_PROBE_WINDOW,
            loopback_config: default_loopback_config(),
            loopback_attempts: DEFAULT_ATTEMPTS,
            loopback_window: DEFAULT_READ_WINDOW,
            loopback_pause: DEFAULT_RETRY_PAUSE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            watchdog_poll: DEFAULT_WATCHDOG_POLL,
            smoothing: None,
            guard_pause: DEFAULT_GUARD_PAUSE,
            signals: None,
            port_filter: PortFilter::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Restrict or reorder the candidate configurations.
    pub fn parameter_space(mut self, space: ParameterSpace) -> Self {
        self.space = space;
        self
    }

    pub fn decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder = config;
        self
    }

    /// Time spent listening to each candidate (default: 1500ms).
    pub fn probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }

    /// Configuration used for the loopback test (default: 9600 8N1 CRLF).
    pub fn loopback_config(mut self, config: LinkConfig) -> Self {
        self.loopback_config = config;
        self
    }

    pub fn loopback_attempts(mut self, attempts: u32) -> Self {
        self.loopback_attempts = attempts;
        self
    }

    /// Read-back window per loopback attempt (default: 300ms).
    pub fn loopback_window(mut self, window: Duration) -> Self {
        self.loopback_window = window;
        self
    }

    pub fn loopback_pause(mut self, pause: Duration) -> Self {
        self.loopback_pause = pause;
        self
    }

    /// Blank the weight after this long without a decoded telegram
    /// (default: 3s).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn watchdog_poll(mut self, poll: Duration) -> Self {
        self.watchdog_poll = poll;
        self
    }

    /// Show a moving average over the last `n` weights. Off by default.
    pub fn smoothing(mut self, n: usize) -> Self {
        self.smoothing = Some(n);
        self
    }

    /// Pause after closing a channel before reopening it (default: 50ms).
    pub fn guard_pause(mut self, pause: Duration) -> Self {
        self.guard_pause = pause;
        self
    }

    /// Control lines to assert after every open.
    pub fn signals(mut self, signals: Signals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Ports considered by [`build()`](Self::build).
    pub fn port_filter(mut self, filter: PortFilter) -> Self {
        self.port_filter = filter;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Entries kept in the diagnostic log (default: 200).
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.probe_window.is_zero() {
            return Err(Error::InvalidParameter("probe window must be positive".into()));
        }
        if self.loopback_window.is_zero() {
            return Err(Error::InvalidParameter(
                "loopback window must be positive".into(),
            ));
        }
        if self.idle_timeout.is_zero() || self.watchdog_poll.is_zero() {
            return Err(Error::InvalidParameter(
                "idle timeout and watchdog poll must be positive".into(),
            ));
        }
        if self.smoothing == Some(0) {
            return Err(Error::InvalidParameter(
                "smoothing window must hold at least one value".into(),
            ));
        }
        if !self.decoder.scale_factor.is_finite() || self.decoder.scale_factor == 0.0 {
            return Err(Error::InvalidParameter(
                "scale factor must be finite and non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Spawn a supervisor over a caller-provided authorizer.
    ///
    /// This is the entry point for tests (pass a `MockAuthorizer` from
    /// `scalelink-test-harness`) and for hosts with their own channel
    /// permission model. Must be called within a Tokio runtime.
    pub async fn build_with_authorizer(
        self,
        authorizer: Box<dyn Authorizer>,
    ) -> Result<SupervisorHandle> {
        self.validate()?;

        let decoder = TelegramDecoder::new(self.decoder);
        let probe = ProbeEngine::new(decoder.clone())
            .space(self.space)
            .window(self.probe_window);
        let loopback = LoopbackTester::new()
            .config(self.loopback_config)
            .attempts(self.loopback_attempts)
            .window(self.loopback_window)
            .pause(self.loopback_pause);
        let read = ReadSettings {
            decoder,
            idle_timeout: self.idle_timeout,
            watchdog_poll: self.watchdog_poll,
            smoothing: self.smoothing,
        };

        Ok(supervisor::spawn(SupervisorParts {
            authorizer,
            probe,
            loopback,
            read,
            guard_pause: self.guard_pause,
            signals: self.signals,
            log_capacity: self.log_capacity,
            input_capacity: DEFAULT_INPUT_CAPACITY,
            event_capacity: self.event_capacity,
        }))
    }

    /// Spawn a supervisor over the host's serial ports.
    pub async fn build(self) -> Result<SupervisorHandle> {
        let authorizer = SerialAuthorizer::new(self.port_filter.clone());
        self.build_with_authorizer(Box::new(authorizer)).await
    }
}
