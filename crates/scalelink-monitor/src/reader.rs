//! Continuous reading of a validated link.
//!
//! A [`ReadSession`] owns the channel in a spawned task, decodes every
//! line and publishes the result. An idle watchdog runs beside it and
//! blanks the displayed weight once no valid telegram has arrived for the
//! idle timeout, exactly once per idle period.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use scalelink_core::events::{ScaleEvent, StatusSnapshot};
use scalelink_core::types::LinkConfig;
use scalelink_text_io::decoder::TelegramDecoder;
use scalelink_text_io::io::{ChannelSession, LastSeen, LineReader, ReadOutcome, Wait, race};

use crate::smoothing::SmoothingWindow;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_WATCHDOG_POLL: Duration = Duration::from_millis(250);

/// Upper bound on one wait for a line, so stop requests are seen promptly
/// even on a silent link.
const LINE_WAIT: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Settings for a [`ReadSession`].
#[derive(Debug, Clone)]
pub struct ReadSettings {
    pub decoder: TelegramDecoder,
    pub idle_timeout: Duration,
    pub watchdog_poll: Duration,
    /// Moving-average window size; `None` disables smoothing.
    pub smoothing: Option<usize>,
}

impl Default for ReadSettings {
    fn default() -> Self {
        ReadSettings {
            decoder: TelegramDecoder::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            watchdog_poll: DEFAULT_WATCHDOG_POLL,
            smoothing: None,
        }
    }
}

/// Where sessions and the supervisor publish what they see.
#[derive(Debug, Clone)]
pub struct Outputs {
    pub events: broadcast::Sender<ScaleEvent>,
    pub status: Arc<watch::Sender<StatusSnapshot>>,
}

impl Outputs {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (status, _) = watch::channel(StatusSnapshot::default());
        Outputs {
            events,
            status: Arc::new(status),
        }
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ScaleEvent) {
        let _ = self.events.send(event);
    }

    pub fn update_status(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        self.status.send_modify(f);
    }
}

/// Why a read session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Stopped by its owner.
    Stopped,
    /// The channel signalled end-of-stream.
    EndOfStream,
    /// A read failed.
    ChannelLost(String),
    /// The channel would not open with the configuration.
    OpenFailed(String),
}

/// A finished session: why it ended, and the channel back.
pub struct SessionEnd {
    pub reason: EndReason,
    pub session: ChannelSession,
}

/// Displayed weight, shared by the read loop and the watchdog.
#[derive(Debug)]
struct Display {
    weight: Option<f64>,
    window: Option<SmoothingWindow>,
    idle: bool,
}

impl Display {
    fn record(&mut self, value: f64) -> f64 {
        self.idle = false;
        let shown = match self.window.as_mut() {
            Some(window) => window.push(value),
            None => value,
        };
        self.weight = Some(shown);
        shown
    }

    /// Blank the display. Returns false if already blanked this idle period.
    fn reset_idle(&mut self) -> bool {
        if self.idle {
            return false;
        }
        self.idle = true;
        self.weight = None;
        if let Some(window) = self.window.as_mut() {
            window.clear();
        }
        true
    }
}

#[derive(Debug, Clone)]
struct SharedDisplay(Arc<Mutex<Display>>);

impl SharedDisplay {
    fn lock(&self) -> MutexGuard<'_, Display> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a running read session.
pub struct ReadSession {
    config: LinkConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<SessionEnd>>,
    display: SharedDisplay,
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

impl ReadSession {
    /// Reopen `session` with `config` and start reading in a new task.
    pub fn spawn(
        session: ChannelSession,
        config: LinkConfig,
        settings: ReadSettings,
        outputs: Outputs,
    ) -> Self {
        let cancel = CancellationToken::new();
        let display = SharedDisplay(Arc::new(Mutex::new(Display {
            weight: None,
            window: settings.smoothing.map(SmoothingWindow::new),
            idle: false,
        })));

        let task = tokio::spawn(read_loop(
            session,
            config,
            settings,
            outputs,
            display.clone(),
            cancel.clone(),
        ));

        ReadSession {
            config,
            cancel,
            task: Some(task),
            display,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The weight currently displayed (smoothed if enabled).
    pub fn current_weight(&self) -> Option<f64> {
        self.display.lock().weight
    }

    /// Wait for the session to end on its own. Cancel-safe; after it has
    /// returned once, later calls never complete.
    pub async fn ended(&mut self) -> Option<SessionEnd> {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = task.await;
        self.task = None;
        match joined {
            Ok(end) => Some(end),
            Err(e) => {
                warn!(error = %e, "read task failed");
                None
            }
        }
    }

    /// Stop reading and wait for the task. Idempotent with respect to the
    /// channel: the task closes it on the way out.
    pub async fn stop(mut self) -> Option<SessionEnd> {
        self.cancel.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(end) => Some(end),
            Err(e) => {
                warn!(error = %e, "read task failed");
                None
            }
        }
    }
}

impl Drop for ReadSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    mut session: ChannelSession,
    config: LinkConfig,
    settings: ReadSettings,
    outputs: Outputs,
    display: SharedDisplay,
    cancel: CancellationToken,
) -> SessionEnd {
    if let Err(e) = session.reopen(config).await {
        warn!(port = %session.id(), config = %config, error = %e, "read session open failed");
        return SessionEnd {
            reason: EndReason::OpenFailed(e.to_string()),
            session,
        };
    }
    info!(port = %session.id(), config = %config, "read session started");

    let last_seen = session.last_seen();
    last_seen.touch();

    let watchdog_cancel = cancel.child_token();
    let watchdog = tokio::spawn(watchdog_loop(
        last_seen.clone(),
        display.clone(),
        settings.idle_timeout,
        settings.watchdog_poll,
        outputs.clone(),
        watchdog_cancel.clone(),
    ));

    let mut reader = LineReader::new(config.delimiter());
    let reason = loop {
        let deadline = Instant::now() + LINE_WAIT;
        match reader.next_line(&mut session, deadline, &cancel).await {
            ReadOutcome::Line(raw) => {
                handle_line(&raw, &settings.decoder, &last_seen, &display, &outputs)
            }
            ReadOutcome::Elapsed => {}
            ReadOutcome::Cancelled => break EndReason::Stopped,
            ReadOutcome::EndOfStream => break EndReason::EndOfStream,
            ReadOutcome::Failed(e) => break EndReason::ChannelLost(e.to_string()),
        }
    };

    for raw in reader.flush() {
        handle_line(&raw, &settings.decoder, &last_seen, &display, &outputs);
    }

    watchdog_cancel.cancel();
    let _ = watchdog.await;

    if let Err(e) = session.close().await {
        debug!(port = %session.id(), error = %e, "close after read failed");
    }
    info!(port = %session.id(), reason = ?reason, "read session ended");
    SessionEnd { reason, session }
}

fn handle_line(
    raw: &str,
    decoder: &TelegramDecoder,
    last_seen: &LastSeen,
    display: &SharedDisplay,
    outputs: &Outputs,
) {
    let telegram = decoder.telegram(raw);
    if telegram.raw_line.is_empty() {
        return;
    }

    outputs.update_status(|s| s.last_line = Some(telegram.raw_line.clone()));
    outputs.emit(ScaleEvent::Line(telegram.clone()));

    match (telegram.weight, telegram.format) {
        (Some(value), Some(format)) => {
            let smoothed = {
                let mut d = display.lock();
                last_seen.touch();
                d.record(value)
            };
            trace!(raw = %telegram.raw_line, value, smoothed, "weight");
            outputs.update_status(|s| s.weight = Some(smoothed));
            outputs.emit(ScaleEvent::Weight {
                value,
                smoothed,
                format,
                flag: telegram.flag,
            });
        }
        _ => {
            debug!(raw = %telegram.raw_line, "line ignored");
            outputs.emit(ScaleEvent::Ignored {
                raw_line: telegram.raw_line,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn watchdog_loop(
    last_seen: LastSeen,
    display: SharedDisplay,
    idle_timeout: Duration,
    poll: Duration,
    outputs: Outputs,
    cancel: CancellationToken,
) {
    loop {
        let next = Instant::now() + poll;
        if let Wait::Cancelled = race(next, &cancel, std::future::pending::<()>()).await {
            return;
        }

        let reset = {
            let mut d = display.lock();
            last_seen.elapsed() > idle_timeout && d.reset_idle()
        };
        if reset {
            info!(idle_ms = millis(last_seen.elapsed()), "no telegram, display reset");
            outputs.update_status(|s| s.weight = None);
            outputs.emit(ScaleEvent::IdleReset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalelink_core::types::{Delimiter, Framing};
    use scalelink_test_harness::MockChannel;

    fn cfg() -> LinkConfig {
        LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::CrLf).unwrap()
    }

    fn session(mock: &MockChannel) -> ChannelSession {
        ChannelSession::new(Box::new(mock.clone())).with_guard_pause(Duration::ZERO)
    }

    fn fast_settings() -> ReadSettings {
        ReadSettings {
            idle_timeout: Duration::from_millis(60),
            watchdog_poll: Duration::from_millis(10),
            ..ReadSettings::default()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn drain(rx: &mut broadcast::Receiver<ScaleEvent>) -> Vec<ScaleEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn count_resets(events: &[ScaleEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ScaleEvent::IdleReset))
            .count()
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn decodes_lines_and_publishes_weight() {
        let mock = MockChannel::new("m").script_any(b"P 12345\r\nnoise\r\n\r\n");
        let outputs = Outputs::new(64);
        let mut rx = outputs.events.subscribe();
        let status = outputs.status.subscribe();

        let read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), outputs);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(approx(read.current_weight().unwrap(), 12.345));
        assert_eq!(status.borrow().last_line.as_deref(), Some("noise"));

        let end = read.stop().await.unwrap();
        assert_eq!(end.reason, EndReason::Stopped);
        assert!(!end.session.is_open());

        let events = drain(&mut rx);
        let lines = events
            .iter()
            .filter(|e| matches!(e, ScaleEvent::Line(_)))
            .count();
        assert_eq!(lines, 2);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ScaleEvent::Ignored { raw_line } if raw_line == "noise"))
        );
    }

    #[tokio::test]
    async fn smoothing_averages_last_n() {
        let mock = MockChannel::new("m").script_any(b"1.0\r\n2.0\r\n3.0\r\n6.0\r\n");
        let settings = ReadSettings {
            smoothing: Some(3),
            ..fast_settings()
        };
        let read = ReadSession::spawn(session(&mock), cfg(), settings, Outputs::new(64));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(read.current_weight(), Some(11.0 / 3.0));
        read.stop().await;
    }

    #[tokio::test]
    async fn idle_reset_fires_once_per_idle_period() {
        let mock = MockChannel::new("m").script_any(b"P 00100\r\n");
        let outputs = Outputs::new(256);
        let mut rx = outputs.events.subscribe();
        let status = outputs.status.subscribe();
        let read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), outputs);

        // Well past several idle timeouts: still exactly one reset.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(read.current_weight(), None);
        assert_eq!(status.borrow().weight, None);
        assert_eq!(count_resets(&drain(&mut rx)), 1);

        // A new telegram starts a new period.
        mock.push_rx(b"P 00200\r\n");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(approx(read.current_weight().unwrap(), 0.2));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count_resets(&drain(&mut rx)), 1);

        read.stop().await;
    }

    #[tokio::test]
    async fn ignored_lines_do_not_hold_off_the_watchdog() {
        let mock = MockChannel::new("m").script_any(b"P 00100\r\n");
        let outputs = Outputs::new(256);
        let mut rx = outputs.events.subscribe();
        let read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), outputs);

        for _ in 0..10 {
            mock.push_rx(b"noise\r\n");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(read.current_weight(), None);
        assert_eq!(count_resets(&drain(&mut rx)), 1);
        read.stop().await;
    }

    #[tokio::test]
    async fn end_of_stream_flushes_tail_and_ends() {
        let mock = MockChannel::new("m")
            .script_any(b"P 00100\r\nN 00050")
            .eof_when_drained(true);
        let outputs = Outputs::new(64);
        let mut rx = outputs.events.subscribe();
        let mut read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), outputs);

        let end = tokio::time::timeout(Duration::from_secs(2), read.ended())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.reason, EndReason::EndOfStream);
        assert!(!mock.currently_open());

        let weights: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ScaleEvent::Weight { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(weights.len(), 2);
        assert!(approx(weights[0], 0.1));
        assert!(approx(weights[1], 0.05));
    }

    #[tokio::test]
    async fn unplug_ends_with_channel_lost() {
        let mock = MockChannel::new("m");
        let mut read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), Outputs::new(8));
        tokio::time::sleep(Duration::from_millis(20)).await;
        mock.unplug();
        let end = tokio::time::timeout(Duration::from_secs(2), read.ended())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(end.reason, EndReason::ChannelLost(_)));
    }

    #[tokio::test]
    async fn rejected_config_ends_with_open_failed() {
        let mock = MockChannel::new("m").accept_none();
        let mut read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), Outputs::new(8));
        let end = read.ended().await.unwrap();
        assert!(matches!(end.reason, EndReason::OpenFailed(_)));
    }

    #[tokio::test]
    async fn stop_flushes_partial_line() {
        let mock = MockChannel::new("m").script_any(b"P 00300");
        let outputs = Outputs::new(64);
        let mut rx = outputs.events.subscribe();
        let read = ReadSession::spawn(session(&mock), cfg(), fast_settings(), outputs);
        tokio::time::sleep(Duration::from_millis(20)).await;
        read.stop().await;
        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, ScaleEvent::Weight { value, .. } if approx(*value, 0.3)))
        );
    }

    #[tokio::test]
    async fn restarting_never_layers_readers() {
        let mock = MockChannel::new("m");
        let outputs = Outputs::new(8);
        let mut s = session(&mock);
        for _ in 0..3 {
            let read = ReadSession::spawn(s, cfg(), fast_settings(), outputs.clone());
            tokio::time::sleep(Duration::from_millis(10)).await;
            s = read.stop().await.unwrap().session;
        }
        assert_eq!(mock.open_count(), 3);
        assert_eq!(mock.max_open_depth(), 1);
    }
}
