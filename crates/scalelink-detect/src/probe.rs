//! Probing a channel for live telemetry.
//!
//! [`ProbeEngine::probe`] opens the channel with one candidate
//! configuration and listens for a bounded window.
//! [`ProbeEngine::auto_detect`] walks a [`ParameterSpace`] in order and
//! stops at the first configuration under which a telegram decodes.
//!
//! There is no cheaper general way to auto-baud a device that does not
//! cooperate, so the search is linear and exhaustive.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use scalelink_core::types::{LinkConfig, Telegram};
use scalelink_text_io::decoder::TelegramDecoder;
use scalelink_text_io::io::{ChannelSession, LineReader, ReadOutcome};

use crate::space::ParameterSpace;

/// Default time spent listening to one candidate configuration.
pub const DEFAULT_PROBE_WINDOW: Duration = Duration::from_millis(1500);

/// Why a probe did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// The channel refused to open with the configuration.
    Rejected(String),
    /// The window elapsed without a decodable line.
    WindowElapsed,
    /// The channel ended before a decodable line arrived.
    EndOfStream,
    /// A read failed.
    ChannelFailed(String),
    Cancelled,
}

/// Outcome of probing one configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    Matched { config: LinkConfig, sample: Telegram },
    Unmatched { config: LinkConfig, reason: MissReason },
}

impl ProbeResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, ProbeResult::Matched { .. })
    }

    pub fn config(&self) -> &LinkConfig {
        match self {
            ProbeResult::Matched { config, .. } | ProbeResult::Unmatched { config, .. } => config,
        }
    }

    pub fn sample(&self) -> Option<&Telegram> {
        match self {
            ProbeResult::Matched { sample, .. } => Some(sample),
            ProbeResult::Unmatched { .. } => None,
        }
    }
}

/// A configuration validated by a decoded telegram.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub config: LinkConfig,
    pub sample: Telegram,
}

/// Runs probes over a channel session.
#[derive(Debug, Clone)]
pub struct ProbeEngine {
    decoder: TelegramDecoder,
    space: ParameterSpace,
    window: Duration,
    cancel: CancellationToken,
}

impl Default for ProbeEngine {
    fn default() -> Self {
        ProbeEngine::new(TelegramDecoder::default())
    }
}

impl ProbeEngine {
    pub fn new(decoder: TelegramDecoder) -> Self {
        ProbeEngine {
            decoder,
            space: ParameterSpace::default(),
            window: DEFAULT_PROBE_WINDOW,
            cancel: CancellationToken::new(),
        }
    }

    pub fn space(mut self, space: ParameterSpace) -> Self {
        self.space = space;
        self
    }

    /// Listening window per configuration in [`auto_detect`](Self::auto_detect).
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Token that aborts a running probe or search.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn decoder(&self) -> &TelegramDecoder {
        &self.decoder
    }

    /// Open `session` with `config` and listen for up to `window`.
    ///
    /// Never fails: a rejected configuration or a failed read is an
    /// unmatched result. On a match the session is left open with
    /// `config`.
    pub async fn probe(
        &self,
        session: &mut ChannelSession,
        config: LinkConfig,
        window: Duration,
    ) -> ProbeResult {
        if let Err(e) = session.reopen(config).await {
            debug!(port = %session.id(), config = %config, error = %e, "configuration rejected");
            return ProbeResult::Unmatched {
                config,
                reason: MissReason::Rejected(e.to_string()),
            };
        }

        let deadline = Instant::now() + window;
        let mut reader = LineReader::new(config.delimiter());
        let reason = loop {
            match reader.next_line(session, deadline, &self.cancel).await {
                ReadOutcome::Line(raw) => {
                    let telegram = self.decoder.telegram(&raw);
                    if telegram.is_decoded() {
                        info!(
                            port = %session.id(),
                            config = %config,
                            raw = %telegram.raw_line,
                            "telegram decoded"
                        );
                        return ProbeResult::Matched {
                            config,
                            sample: telegram,
                        };
                    }
                    if !telegram.raw_line.is_empty() {
                        trace!(config = %config, raw = %telegram.raw_line, "line ignored");
                    }
                }
                ReadOutcome::Elapsed => break MissReason::WindowElapsed,
                ReadOutcome::Cancelled => break MissReason::Cancelled,
                ReadOutcome::EndOfStream => break MissReason::EndOfStream,
                ReadOutcome::Failed(e) => break MissReason::ChannelFailed(e.to_string()),
            }
        };

        debug!(port = %session.id(), config = %config, reason = ?reason, "no telegram");
        ProbeResult::Unmatched { config, reason }
    }

    /// Probe every configuration in order; return the first match.
    pub async fn auto_detect(&self, session: &mut ChannelSession) -> Option<Detection> {
        self.auto_detect_with(session, |_| {}).await
    }

    /// Like [`auto_detect`](Self::auto_detect), reporting every probe
    /// result to `on_result` as it happens.
    pub async fn auto_detect_with<F>(
        &self,
        session: &mut ChannelSession,
        mut on_result: F,
    ) -> Option<Detection>
    where
        F: FnMut(&ProbeResult) + Send,
    {
        info!(port = %session.id(), candidates = self.space.len(), "starting auto-detect");
        for config in self.space.iter() {
            let result = self.probe(session, config, self.window).await;
            on_result(&result);
            match result {
                ProbeResult::Matched { config, sample } => {
                    return Some(Detection { config, sample });
                }
                ProbeResult::Unmatched {
                    reason: MissReason::Cancelled,
                    ..
                } => {
                    debug!(port = %session.id(), "auto-detect cancelled");
                    return None;
                }
                ProbeResult::Unmatched { .. } => {}
            }
        }
        info!(port = %session.id(), "parameter space exhausted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalelink_core::types::{DataBits, Delimiter, Framing, Parity, StopBits, TelegramFormat};
    use scalelink_test_harness::MockChannel;

    const WINDOW: Duration = Duration::from_millis(40);

    fn session(mock: &MockChannel) -> ChannelSession {
        ChannelSession::new(Box::new(mock.clone())).with_guard_pause(Duration::ZERO)
    }

    fn engine() -> ProbeEngine {
        ProbeEngine::default().window(WINDOW)
    }

    fn small_space() -> ParameterSpace {
        ParameterSpace::builder()
            .baud_rates([9600, 4800, 2400])
            .framings([
                Framing::EIGHT_N_ONE,
                Framing::new(DataBits::Seven, Parity::Even, StopBits::One),
            ])
            .delimiters([Delimiter::CrLf, Delimiter::Lf])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn probe_matches_first_decodable_line() {
        let cfg = LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::CrLf).unwrap();
        let mock = MockChannel::new("m").script_any(b"\r\nnoise\r\nP 12345\r\nN 00001\r\n");
        let mut s = session(&mock);

        let result = engine().probe(&mut s, cfg, WINDOW).await;
        let sample = result.sample().unwrap();
        assert_eq!(sample.raw_line, "P 12345");
        assert_eq!(sample.format, Some(TelegramFormat::FlaggedFixed));
        assert_eq!(result.config(), &cfg);
        assert!(s.is_open());
    }

    #[tokio::test]
    async fn probe_rejected_config_is_unmatched() {
        let cfg = LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::CrLf).unwrap();
        let mock = MockChannel::new("m").accept_none();
        let mut s = session(&mock);
        let result = engine().probe(&mut s, cfg, WINDOW).await;
        assert!(matches!(
            result,
            ProbeResult::Unmatched {
                reason: MissReason::Rejected(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn probe_window_elapses_on_silence() {
        let cfg = LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::CrLf).unwrap();
        let mock = MockChannel::new("m").script_any(b"hello\r\n");
        let mut s = session(&mock);
        let started = Instant::now();
        let result = engine().probe(&mut s, cfg, WINDOW).await;
        assert_eq!(
            result,
            ProbeResult::Unmatched {
                config: cfg,
                reason: MissReason::WindowElapsed
            }
        );
        assert!(started.elapsed() >= WINDOW);
    }

    #[tokio::test]
    async fn probe_decodes_unterminated_tail_at_end_of_stream() {
        let cfg = LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::CrLf).unwrap();
        let mock = MockChannel::new("m")
            .script_any(b"D025500")
            .eof_when_drained(true);
        let mut s = session(&mock);
        let result = engine().probe(&mut s, cfg, WINDOW).await;
        assert!(result.is_matched());
        assert_eq!(result.sample().unwrap().weight, Some(25.5));
    }

    #[tokio::test]
    async fn auto_detect_finds_the_only_accepted_config() {
        let space = small_space();
        let wanted = LinkConfig::new(
            2400,
            Framing::new(DataBits::Seven, Parity::Even, StopBits::One),
            Delimiter::Lf,
        )
        .unwrap();
        let mock = MockChannel::new("m")
            .accept_only([wanted])
            .script(wanted, b"N 00250\nN 00260\n")
            .chunk_size(2);
        let mut s = session(&mock);

        let mut seen = Vec::new();
        let found = engine()
            .space(space.clone())
            .auto_detect_with(&mut s, |r| seen.push(*r.config()))
            .await
            .unwrap();

        assert_eq!(found.config, wanted);
        assert_eq!(found.sample.raw_line, "N 00250");
        // Every candidate up to and including the match was tried, in order.
        let expected: Vec<LinkConfig> = space.iter().take_while(|c| *c != wanted).collect();
        assert_eq!(&seen[..seen.len() - 1], expected.as_slice());
        assert_eq!(seen.last(), Some(&wanted));
        assert_eq!(mock.opened_configs(), vec![wanted]);
    }

    #[tokio::test]
    async fn auto_detect_first_plausible_config_wins() {
        // Every configuration decodes, so the first enumerated one wins.
        let mock = MockChannel::new("m").script_any(b"+1.5\r\n+1.5\n");
        let mut s = session(&mock);
        let found = engine().space(small_space()).auto_detect(&mut s).await.unwrap();
        assert_eq!(found.config.label(), "9600 8N1 CRLF");
    }

    #[tokio::test]
    async fn auto_detect_exhausts_to_none() {
        let mock = MockChannel::new("m").script_any(b"hello\r\n");
        let mut s = session(&mock);
        let space = ParameterSpace::builder()
            .baud_rates([9600, 4800])
            .framings([Framing::EIGHT_N_ONE])
            .delimiters([Delimiter::CrLf])
            .build()
            .unwrap();
        assert!(engine().space(space).auto_detect(&mut s).await.is_none());
        assert_eq!(mock.open_count(), 2);
        assert_eq!(mock.max_open_depth(), 1);
    }

    #[tokio::test]
    async fn auto_detect_stops_when_cancelled() {
        let mock = MockChannel::new("m");
        let mut s = session(&mock);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let found = engine()
            .space(small_space())
            .cancel_token(cancel)
            .auto_detect(&mut s)
            .await;
        assert!(found.is_none());
        assert_eq!(mock.open_count(), 1);
    }
}
