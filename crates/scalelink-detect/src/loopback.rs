//! Loopback wiring test.
//!
//! Run when no configuration yields telemetry. A random token is written
//! and the channel is read back; seeing the exact token again means the
//! link itself carries bytes (a loopback plug, or a device that echoes)
//! even though nothing decodes.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scalelink_core::error::Error;
use scalelink_core::types::LinkConfig;
use scalelink_text_io::io::{ChannelSession, Wait, race};

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_READ_WINDOW: Duration = Duration::from_millis(300);
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(150);

const RECEIVE_POLL: Duration = Duration::from_millis(50);

/// The tolerant configuration used for the test: 9600 8N1, CR LF.
pub fn default_loopback_config() -> LinkConfig {
    LinkConfig::default()
}

/// A fresh token unlikely to occur in line noise.
pub fn make_token() -> String {
    let n: u64 = rand::thread_rng().r#gen();
    format!("SLNK{n:016X}")
}

/// Whether `token` occurs byte-for-byte anywhere in `received`.
pub fn contains_token(received: &[u8], token: &[u8]) -> bool {
    !token.is_empty() && received.windows(token.len()).any(|w| w == token)
}

enum Attempt {
    Echoed,
    NoEcho,
    Cancelled,
    Failed(Error),
}

/// Echo-based wiring test.
#[derive(Debug, Clone)]
pub struct LoopbackTester {
    config: LinkConfig,
    attempts: u32,
    window: Duration,
    pause: Duration,
    cancel: CancellationToken,
}

impl Default for LoopbackTester {
    fn default() -> Self {
        LoopbackTester {
            config: default_loopback_config(),
            attempts: DEFAULT_ATTEMPTS,
            window: DEFAULT_READ_WINDOW,
            pause: DEFAULT_RETRY_PAUSE,
            cancel: CancellationToken::new(),
        }
    }
}

impl LoopbackTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of token round trips to try (minimum 1).
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// How long to read back after each write.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Pause between attempts.
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn link_config(&self) -> &LinkConfig {
        &self.config
    }

    /// Run the test. Never fails: every channel error counts as "no echo".
    ///
    /// On success the session is left open with the loopback
    /// configuration; on failure it is closed.
    pub async fn run(&self, session: &mut ChannelSession) -> bool {
        if let Err(e) = session.reopen(self.config).await {
            warn!(port = %session.id(), error = %e, "loopback open failed");
            let _ = session.close().await;
            return false;
        }

        for attempt in 1..=self.attempts {
            if attempt > 1 {
                if let Wait::Cancelled = race(
                    Instant::now() + self.pause,
                    &self.cancel,
                    std::future::pending::<()>(),
                )
                .await
                {
                    break;
                }
            }

            match self.round_trip(session).await {
                Attempt::Echoed => {
                    info!(port = %session.id(), attempt, "loopback echo confirmed");
                    return true;
                }
                Attempt::NoEcho => debug!(port = %session.id(), attempt, "no loopback echo"),
                Attempt::Cancelled => break,
                Attempt::Failed(e) => {
                    debug!(port = %session.id(), attempt, error = %e, "loopback attempt failed");
                    if e.is_channel_lost() {
                        break;
                    }
                }
            }
        }

        let _ = session.close().await;
        false
    }

    /// One write/read-back cycle.
    async fn round_trip(&self, session: &mut ChannelSession) -> Attempt {
        let token = make_token();
        let mut payload = token.clone().into_bytes();
        payload.extend_from_slice(self.config.delimiter().as_bytes());
        if let Err(e) = session.send(&payload).await {
            return Attempt::Failed(e);
        }

        let deadline = Instant::now() + self.window;
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match race(deadline, &self.cancel, session.receive(&mut buf, RECEIVE_POLL)).await {
                Wait::Ready(Ok(0)) => return Attempt::Failed(Error::EndOfStream),
                Wait::Ready(Ok(n)) => {
                    received.extend_from_slice(&buf[..n]);
                    if contains_token(&received, token.as_bytes()) {
                        return Attempt::Echoed;
                    }
                }
                Wait::Ready(Err(Error::Timeout)) => {}
                Wait::Ready(Err(e)) => return Attempt::Failed(e),
                Wait::Elapsed => return Attempt::NoEcho,
                Wait::Cancelled => return Attempt::Cancelled,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalelink_test_harness::MockChannel;

    fn tester() -> LoopbackTester {
        LoopbackTester::new()
            .window(Duration::from_millis(30))
            .pause(Duration::from_millis(5))
    }

    fn session(mock: &MockChannel) -> ChannelSession {
        ChannelSession::new(Box::new(mock.clone())).with_guard_pause(Duration::ZERO)
    }

    #[test]
    fn tokens_are_unique() {
        let a = make_token();
        let b = make_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn token_search() {
        assert!(contains_token(b"xxSLNK1yy", b"SLNK1"));
        assert!(!contains_token(b"SLNK", b"SLNK1"));
        assert!(!contains_token(b"abc", b""));
    }

    #[tokio::test]
    async fn echoing_channel_passes() {
        let mock = MockChannel::new("m").echo(true).chunk_size(3);
        let mut s = session(&mock);
        assert!(tester().run(&mut s).await);
        assert_eq!(mock.sent_data().len(), 1);
        assert!(mock.sent_data()[0].ends_with(b"\r\n"));
        assert!(s.is_open());
        assert_eq!(mock.opened_configs(), vec![default_loopback_config()]);
    }

    #[tokio::test]
    async fn silent_channel_fails_after_all_attempts() {
        let mock = MockChannel::new("m");
        let mut s = session(&mock);
        assert!(!tester().run(&mut s).await);
        assert_eq!(mock.sent_data().len(), DEFAULT_ATTEMPTS as usize);
        assert!(!mock.currently_open());
    }

    #[tokio::test]
    async fn stale_bytes_are_not_an_echo() {
        // The device talks, but never repeats what was written.
        let mock = MockChannel::new("m").script_any(b"SLNK0000000000000000\r\n");
        let mut s = session(&mock);
        assert!(!tester().attempts(1).run(&mut s).await);
    }

    #[tokio::test]
    async fn rejected_open_fails_without_error() {
        let mock = MockChannel::new("m").accept_none();
        let mut s = session(&mock);
        assert!(!tester().run(&mut s).await);
        assert!(mock.sent_data().is_empty());
    }

    #[tokio::test]
    async fn unplugged_channel_fails() {
        let mock = MockChannel::new("m").echo(true);
        let mut s = session(&mock);
        s.reopen(default_loopback_config()).await.unwrap();
        mock.unplug();
        assert!(!tester().run(&mut s).await);
    }
}
