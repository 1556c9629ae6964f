//! Mock channel for deterministic testing of detection and reading.
//!
//! [`MockChannel`] implements the [`Channel`] trait over shared in-memory
//! state. Cloning it yields another handle to the same device, so a test
//! can box one clone into the code under test and keep another to script
//! output and inspect what happened.
//!
//! # Example
//!
//! ```
//! use scalelink_core::{Delimiter, Framing, LinkConfig};
//! use scalelink_test_harness::MockChannel;
//!
//! let wanted = LinkConfig::new(4800, Framing::EIGHT_N_ONE, Delimiter::CrLf).unwrap();
//! let mock = MockChannel::new("/dev/ttyUSB0")
//!     .accept_only([wanted])
//!     .script(wanted, b"P 12345\r\n");
//! assert_eq!(mock.open_count(), 0);
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use scalelink_core::error::{Error, Result};
use scalelink_core::transport::{Channel, Signals};
use scalelink_core::types::{ChannelId, LinkConfig};

/// Longest a `receive()` with no data sleeps before reporting a timeout.
const IDLE_RECEIVE: Duration = Duration::from_millis(10);

type AcceptFn = Arc<dyn Fn(&LinkConfig) -> bool + Send + Sync>;

#[derive(Default)]
struct MockState {
    /// `None` accepts every configuration.
    accept: Option<AcceptFn>,
    /// Bytes queued on open for a specific configuration.
    scripts: HashMap<LinkConfig, Vec<u8>>,
    /// Bytes queued on open when no per-config script exists.
    default_script: Vec<u8>,
    echo: bool,
    chunk_size: Option<usize>,
    eof_when_drained: bool,
    unplugged: bool,

    open: bool,
    depth: usize,
    max_depth: usize,
    open_count: usize,
    close_count: usize,
    rx: VecDeque<u8>,
    opened: Vec<LinkConfig>,
    sent: Vec<Vec<u8>>,
    signals: Option<Signals>,
}

/// A simulated scale (or loopback plug) behind a [`Channel`].
#[derive(Clone)]
pub struct MockChannel {
    id: ChannelId,
    state: Arc<Mutex<MockState>>,
}

impl fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.lock();
        f.debug_struct("MockChannel")
            .field("id", &self.id)
            .field("open", &s.open)
            .field("open_count", &s.open_count)
            .field("close_count", &s.close_count)
            .finish()
    }
}

impl MockChannel {
    /// Create a closed mock channel that accepts every configuration and
    /// never produces data.
    pub fn new(id: impl Into<String>) -> Self {
        MockChannel {
            id: ChannelId::new(id),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- configuration ------------------------------------------------------

    /// Accept only configurations for which `pred` returns true.
    pub fn accept_when(self, pred: impl Fn(&LinkConfig) -> bool + Send + Sync + 'static) -> Self {
        self.lock().accept = Some(Arc::new(pred));
        self
    }

    /// Accept only the listed configurations.
    pub fn accept_only(self, configs: impl IntoIterator<Item = LinkConfig>) -> Self {
        let allowed: Vec<LinkConfig> = configs.into_iter().collect();
        self.accept_when(move |c| allowed.contains(c))
    }

    /// Reject every configuration.
    pub fn accept_none(self) -> Self {
        self.accept_when(|_| false)
    }

    /// Queue `bytes` for reading each time the channel opens with `config`.
    pub fn script(self, config: LinkConfig, bytes: &[u8]) -> Self {
        self.lock().scripts.insert(config, bytes.to_vec());
        self
    }

    /// Queue `bytes` on every open without a per-config script.
    pub fn script_any(self, bytes: &[u8]) -> Self {
        self.lock().default_script = bytes.to_vec();
        self
    }

    /// Echo every sent byte back into the receive queue.
    pub fn echo(self, on: bool) -> Self {
        self.lock().echo = on;
        self
    }

    /// Limit each `receive()` to at most `n` bytes.
    pub fn chunk_size(self, n: usize) -> Self {
        self.lock().chunk_size = Some(n.max(1));
        self
    }

    /// Report end-of-stream once the receive queue is empty.
    pub fn eof_when_drained(self, on: bool) -> Self {
        self.lock().eof_when_drained = on;
        self
    }

    // -- runtime control ----------------------------------------------------

    /// Append bytes to the receive queue of the currently open channel.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    /// Simulate the device disappearing: I/O fails and opens are refused.
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    /// Undo [`unplug()`](Self::unplug).
    pub fn replug(&self) {
        self.lock().unplugged = false;
    }

    // -- inspection ---------------------------------------------------------

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Highest number of simultaneously open handles ever observed.
    pub fn max_open_depth(&self) -> usize {
        self.lock().max_depth
    }

    /// Configurations successfully opened, in order.
    pub fn opened_configs(&self) -> Vec<LinkConfig> {
        self.lock().opened.clone()
    }

    /// Every buffer passed to `send()`, in order.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Last control-line state set.
    pub fn signals(&self) -> Option<Signals> {
        self.lock().signals
    }

    pub fn currently_open(&self) -> bool {
        self.lock().open
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn open(&mut self, config: &LinkConfig) -> Result<()> {
        let mut s = self.lock();
        if s.unplugged {
            return Err(Error::Transport(format!("{} not present", self.id)));
        }
        let accepted = s.accept.as_ref().is_none_or(|pred| pred(config));
        if !accepted {
            return Err(Error::ConfigRejected {
                config: *config,
                reason: "parameters not supported by device".into(),
            });
        }

        s.open = true;
        s.depth += 1;
        s.max_depth = s.max_depth.max(s.depth);
        s.open_count += 1;
        s.opened.push(*config);

        let script = s
            .scripts
            .get(config)
            .cloned()
            .unwrap_or_else(|| s.default_script.clone());
        s.rx.clear();
        s.rx.extend(script);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut s = self.lock();
        if !s.open {
            return Err(Error::NotConnected);
        }
        if s.unplugged {
            return Err(Error::ConnectionLost);
        }
        s.sent.push(data.to_vec());
        if s.echo {
            s.rx.extend(data.iter().copied());
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        {
            let mut s = self.lock();
            if !s.open {
                return Err(Error::NotConnected);
            }
            if s.unplugged {
                return Err(Error::ConnectionLost);
            }
            if !s.rx.is_empty() {
                let limit = s.chunk_size.unwrap_or(usize::MAX);
                let n = s.rx.len().min(buf.len()).min(limit);
                for (slot, byte) in buf.iter_mut().zip(s.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if s.eof_when_drained {
                return Ok(0);
            }
        }
        tokio::time::sleep(timeout.min(IDLE_RECEIVE)).await;
        Err(Error::Timeout)
    }

    async fn close(&mut self) -> Result<()> {
        let mut s = self.lock();
        if s.open {
            s.close_count += 1;
            s.depth = s.depth.saturating_sub(1);
            s.open = s.depth > 0;
            s.rx.clear();
        }
        Ok(())
    }

    async fn set_signals(&mut self, signals: Signals) -> Result<()> {
        self.lock().signals = Some(signals);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}
