//! The connect / probe / read / recover lifecycle.
//!
//! One supervisor task consumes an inbound channel of
//! [`SupervisorInput`]s and walks the states in [`LinkState`]:
//!
//! ```text
//! Idle -> EnumeratingChannels -> Probing -> LoopbackTesting -> Active -> Disconnected -> Idle
//!                  |                                              ^
//!                  +--> AwaitingAuthorization (until a gesture)   |
//!                  +--> Probing --(telegram decoded)--------------+
//! ```
//!
//! The search is sequential: at most one channel is probed or read at a
//! time. Inputs that arrive mid-search are still seen, so a disconnect or
//! shutdown aborts a long probe promptly.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scalelink_core::diag::{DiagLevel, DiagnosticEntry, DiagnosticLog};
use scalelink_core::error::{Error, Result};
use scalelink_core::events::{
    ActiveMode, HotplugEvent, LinkState, ScaleEvent, StatusSnapshot,
};
use scalelink_core::transport::{Authorizer, Channel, Signals};
use scalelink_core::types::{ChannelId, LinkConfig};
use scalelink_detect::loopback::LoopbackTester;
use scalelink_detect::probe::{MissReason, ProbeEngine, ProbeResult};
use scalelink_text_io::io::ChannelSession;

use crate::reader::{EndReason, Outputs, ReadSession, ReadSettings};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Something the outside world tells the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorInput {
    Hotplug(HotplugEvent),
    /// The user explicitly asked to grant access to a device. The only
    /// time [`Authorizer::request_authorization`] is called.
    AuthorizationGesture,
    Shutdown,
}

impl From<HotplugEvent> for SupervisorInput {
    fn from(event: HotplugEvent) -> Self {
        SupervisorInput::Hotplug(event)
    }
}

/// Everything the supervisor task needs, assembled by the builder.
pub(crate) struct SupervisorParts {
    pub authorizer: Box<dyn Authorizer>,
    pub probe: ProbeEngine,
    pub loopback: LoopbackTester,
    pub read: ReadSettings,
    pub guard_pause: Duration,
    pub signals: Option<Signals>,
    pub log_capacity: usize,
    pub input_capacity: usize,
    pub event_capacity: usize,
}

/// Handle to a running supervisor.
pub struct SupervisorHandle {
    inputs: mpsc::Sender<SupervisorInput>,
    events: broadcast::Sender<ScaleEvent>,
    status: watch::Receiver<StatusSnapshot>,
    log: SharedLog,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Subscribe to events. Only events sent after subscribing are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<ScaleEvent> {
        self.events.subscribe()
    }

    /// The latest status snapshot, updated on every change.
    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// A sender for inputs, e.g. to forward hot-plug events from a watcher.
    pub fn inputs(&self) -> mpsc::Sender<SupervisorInput> {
        self.inputs.clone()
    }

    pub async fn notify(&self, event: HotplugEvent) -> Result<()> {
        self.send(SupervisorInput::Hotplug(event)).await
    }

    /// Forward a user's explicit request to authorize a device.
    pub async fn authorization_gesture(&self) -> Result<()> {
        self.send(SupervisorInput::AuthorizationGesture).await
    }

    async fn send(&self, input: SupervisorInput) -> Result<()> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Copy of the diagnostic log, oldest first.
    pub fn diagnostics(&self) -> Vec<DiagnosticEntry> {
        self.log.lock().entries().cloned().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the supervisor, tearing down any active session.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.inputs.send(SupervisorInput::Shutdown).await;
        self.task
            .await
            .map_err(|e| Error::Transport(format!("supervisor task failed: {e}")))
    }
}

#[derive(Clone)]
struct SharedLog(Arc<Mutex<DiagnosticLog>>);

impl SharedLog {
    fn lock(&self) -> MutexGuard<'_, DiagnosticLog> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Publishes state, diagnostics and events.
#[derive(Clone)]
struct Reporter {
    outputs: Outputs,
    log: SharedLog,
}

impl Reporter {
    fn state(&self, state: LinkState) {
        info!(state = %state, "supervisor state");
        let active = state.is_active();
        self.outputs.update_status(|s| {
            s.status = state.to_string();
            if !active {
                s.config_label = None;
                s.weight = None;
            }
        });
        self.outputs.emit(ScaleEvent::StateChanged(state));
    }

    fn diag(&self, level: DiagLevel, message: String) {
        match level {
            DiagLevel::Debug => debug!("{message}"),
            DiagLevel::Info => info!("{message}"),
            DiagLevel::Warn => warn!("{message}"),
        }
        let entry = self.log.lock().push(level, message);
        self.outputs.emit(ScaleEvent::Diagnostic(entry));
    }

    fn probe_result(&self, result: &ProbeResult) {
        match result {
            ProbeResult::Matched { config, sample } => self.diag(
                DiagLevel::Info,
                format!("{config}: decoded \"{}\"", sample.raw_line),
            ),
            ProbeResult::Unmatched {
                reason: MissReason::Cancelled,
                ..
            } => {}
            ProbeResult::Unmatched { config, reason } => {
                let why = match reason {
                    MissReason::Rejected(e) => format!("rejected ({e})"),
                    MissReason::WindowElapsed => "no telegram".to_string(),
                    MissReason::EndOfStream => "end of stream".to_string(),
                    MissReason::ChannelFailed(e) => format!("read failed ({e})"),
                    MissReason::Cancelled => "cancelled".to_string(),
                };
                self.diag(DiagLevel::Debug, format!("{config}: {why}"));
            }
        }
    }

    fn config_selected(&self, channel: &ChannelId, config: LinkConfig, mode: ActiveMode) {
        self.outputs.update_status(|s| s.config_label = Some(config.label()));
        self.outputs.emit(ScaleEvent::ConfigSelected {
            channel: channel.clone(),
            config,
            mode,
        });
    }
}

/// What interrupted a long operation.
enum Interrupt<T> {
    Done(T),
    Unplugged,
    Shutdown,
}

enum Phase {
    Idle,
    Enumerate,
    AwaitAuthorization,
    Search(Vec<Box<dyn Channel>>),
    Active(ActiveRead),
    Error(String),
    Exit,
}

struct ActiveRead {
    channel: ChannelId,
    read: ReadSession,
}

struct Supervisor {
    authorizer: Box<dyn Authorizer>,
    probe: ProbeEngine,
    loopback: LoopbackTester,
    read: ReadSettings,
    guard_pause: Duration,
    signals: Option<Signals>,
    inputs: mpsc::Receiver<SupervisorInput>,
    reporter: Reporter,
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

pub(crate) fn spawn(parts: SupervisorParts) -> SupervisorHandle {
    let (tx, rx) = mpsc::channel(parts.input_capacity.max(1));
    let outputs = Outputs::new(parts.event_capacity);
    let log = SharedLog(Arc::new(Mutex::new(DiagnosticLog::new(parts.log_capacity))));
    let status = outputs.status.subscribe();
    let events = outputs.events.clone();

    let supervisor = Supervisor {
        authorizer: parts.authorizer,
        probe: parts.probe,
        loopback: parts.loopback,
        read: parts.read,
        guard_pause: parts.guard_pause,
        signals: parts.signals,
        inputs: rx,
        reporter: Reporter {
            outputs,
            log: log.clone(),
        },
    };
    let task = tokio::spawn(supervisor.run());

    SupervisorHandle {
        inputs: tx,
        events,
        status,
        log,
        task,
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

impl Supervisor {
    async fn run(mut self) {
        let mut phase = Phase::Enumerate;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Enumerate => self.enumerate().await,
                Phase::AwaitAuthorization => self.await_authorization().await,
                Phase::Search(channels) => self.search(channels).await,
                Phase::Active(active) => self.active(active).await,
                Phase::Error(msg) => self.error(msg).await,
                Phase::Exit => break,
            };
        }
        info!("supervisor stopped");
    }

    async fn idle(&mut self) -> Phase {
        self.reporter.state(LinkState::Idle);
        loop {
            match self.inputs.recv().await {
                Some(SupervisorInput::Hotplug(HotplugEvent::Connected(id))) => {
                    self.reporter
                        .diag(DiagLevel::Info, format!("{id} connected"));
                    return Phase::Enumerate;
                }
                Some(SupervisorInput::Hotplug(HotplugEvent::Disconnected(_))) => {}
                Some(SupervisorInput::AuthorizationGesture) => {
                    if let Some(phase) = self.request_authorization().await {
                        return phase;
                    }
                }
                Some(SupervisorInput::Shutdown) | None => return Phase::Exit,
            }
        }
    }

    async fn enumerate(&mut self) -> Phase {
        self.reporter.state(LinkState::EnumeratingChannels);
        match self.authorizer.list_authorized().await {
            Ok(channels) if channels.is_empty() => Phase::AwaitAuthorization,
            Ok(channels) => {
                let names: Vec<String> = channels.iter().map(|c| c.id().to_string()).collect();
                self.reporter.diag(
                    DiagLevel::Info,
                    format!("authorized channels: {}", names.join(", ")),
                );
                Phase::Search(channels)
            }
            Err(e) => Phase::Error(format!("cannot list channels: {e}")),
        }
    }

    async fn await_authorization(&mut self) -> Phase {
        self.reporter.state(LinkState::AwaitingAuthorization);
        self.reporter.diag(
            DiagLevel::Info,
            "no authorized channel; waiting for the user to grant one".to_string(),
        );
        loop {
            match self.inputs.recv().await {
                Some(SupervisorInput::AuthorizationGesture) => {
                    if let Some(phase) = self.request_authorization().await {
                        return phase;
                    }
                }
                Some(SupervisorInput::Hotplug(HotplugEvent::Connected(_))) => {
                    return Phase::Enumerate;
                }
                Some(SupervisorInput::Hotplug(HotplugEvent::Disconnected(_))) => {}
                Some(SupervisorInput::Shutdown) | None => return Phase::Exit,
            }
        }
    }

    /// Handle one gesture. `None` means stay in the current state.
    async fn request_authorization(&mut self) -> Option<Phase> {
        match self.authorizer.request_authorization().await {
            Ok(Some(channel)) => {
                self.reporter
                    .diag(DiagLevel::Info, format!("{} authorized", channel.id()));
                Some(Phase::Enumerate)
            }
            Ok(None) => {
                self.reporter
                    .diag(DiagLevel::Info, "authorization declined".to_string());
                None
            }
            Err(e) => Some(Phase::Error(format!("authorization failed: {e}"))),
        }
    }

    async fn search(&mut self, channels: Vec<Box<dyn Channel>>) -> Phase {
        let mut rescan = false;
        for channel in channels {
            let id = channel.id().clone();
            let mut session = ChannelSession::new(channel)
                .with_guard_pause(self.guard_pause)
                .with_signals(self.signals);

            self.reporter.state(LinkState::Probing(id.clone()));
            let reporter = &self.reporter;
            let detect = self
                .probe
                .auto_detect_with(&mut session, |r| reporter.probe_result(r));
            let detected =
                match until_input(&mut self.inputs, reporter, &id, &mut rescan, detect).await {
                    Interrupt::Done(found) => found,
                    Interrupt::Unplugged => {
                        let _ = session.close().await;
                        self.reporter
                            .diag(DiagLevel::Warn, format!("{id} removed while probing"));
                        continue;
                    }
                    Interrupt::Shutdown => {
                        let _ = session.close().await;
                        return Phase::Exit;
                    }
                };

            if let Some(found) = detected {
                self.reporter.diag(
                    DiagLevel::Info,
                    format!("scale found on {id} at {}", found.config),
                );
                return self.start_reading(session, found.config, ActiveMode::Telemetry);
            }

            self.reporter
                .diag(DiagLevel::Info, format!("no telemetry on {id}; testing loopback"));
            self.reporter.state(LinkState::LoopbackTesting(id.clone()));
            let test = self.loopback.run(&mut session);
            match until_input(&mut self.inputs, &self.reporter, &id, &mut rescan, test).await {
                Interrupt::Done(true) => {
                    self.reporter.diag(
                        DiagLevel::Warn,
                        format!("link on {id} confirmed by loopback, but no telemetry"),
                    );
                    let config = *self.loopback.link_config();
                    return self.start_reading(session, config, ActiveMode::LinkOnly);
                }
                Interrupt::Done(false) | Interrupt::Unplugged => {
                    let _ = session.close().await;
                    self.reporter
                        .diag(DiagLevel::Warn, format!("no device detected on {id}"));
                }
                Interrupt::Shutdown => {
                    let _ = session.close().await;
                    return Phase::Exit;
                }
            }
        }
        if rescan {
            self.reporter.diag(
                DiagLevel::Info,
                "channel connected during search; enumerating again".to_string(),
            );
            return Phase::Enumerate;
        }
        Phase::Idle
    }

    fn start_reading(&self, session: ChannelSession, config: LinkConfig, mode: ActiveMode) -> Phase {
        let channel = session.id().clone();
        self.reporter.state(LinkState::Active {
            channel: channel.clone(),
            mode,
        });
        self.reporter.config_selected(&channel, config, mode);
        let read = ReadSession::spawn(
            session,
            config,
            self.read.clone(),
            self.reporter.outputs.clone(),
        );
        Phase::Active(ActiveRead { channel, read })
    }

    async fn active(&mut self, mut active: ActiveRead) -> Phase {
        let id = active.channel.clone();
        loop {
            tokio::select! {
                end = active.read.ended() => {
                    let why = match end.as_ref().map(|e| &e.reason) {
                        Some(EndReason::EndOfStream) => "end of stream".to_string(),
                        Some(EndReason::ChannelLost(e)) => format!("channel lost ({e})"),
                        Some(EndReason::OpenFailed(e)) => format!("open failed ({e})"),
                        Some(EndReason::Stopped) => "stopped".to_string(),
                        None => "read task failed".to_string(),
                    };
                    self.reporter.diag(DiagLevel::Warn, format!("{id}: {why}"));
                    if let Some(mut end) = end {
                        let _ = end.session.close().await;
                    }
                    return self.disconnected(id);
                }
                input = self.inputs.recv() => match input {
                    Some(SupervisorInput::Hotplug(HotplugEvent::Disconnected(gone))) if gone == id => {
                        self.reporter.diag(DiagLevel::Warn, format!("{id} disconnected"));
                        teardown(active.read).await;
                        return self.disconnected(id);
                    }
                    Some(SupervisorInput::Hotplug(event)) => {
                        debug!(event = ?event, "hot-plug event ignored while active");
                    }
                    Some(SupervisorInput::AuthorizationGesture) => {
                        debug!("authorization gesture ignored while active");
                    }
                    Some(SupervisorInput::Shutdown) | None => {
                        teardown(active.read).await;
                        return Phase::Exit;
                    }
                }
            }
        }
    }

    fn disconnected(&self, id: ChannelId) -> Phase {
        self.reporter.state(LinkState::Disconnected(id));
        Phase::Idle
    }

    async fn error(&mut self, msg: String) -> Phase {
        self.reporter.diag(DiagLevel::Warn, msg.clone());
        self.reporter.state(LinkState::Error(msg));
        loop {
            match self.inputs.recv().await {
                Some(SupervisorInput::Hotplug(HotplugEvent::Connected(_))) => {
                    return Phase::Enumerate;
                }
                Some(SupervisorInput::AuthorizationGesture) => {
                    if let Some(phase) = self.request_authorization().await {
                        return phase;
                    }
                }
                Some(SupervisorInput::Hotplug(HotplugEvent::Disconnected(_))) => {}
                Some(SupervisorInput::Shutdown) | None => return Phase::Exit,
            }
        }
    }
}

/// Stop a read session and close its channel.
async fn teardown(read: ReadSession) {
    if let Some(mut end) = read.stop().await {
        let _ = end.session.close().await;
    }
}

/// Drive `fut` while still watching the input channel. A disconnect of
/// `watched` or a shutdown abandons `fut`. A connect sets `rescan`; other
/// inputs are dropped.
async fn until_input<F: Future>(
    inputs: &mut mpsc::Receiver<SupervisorInput>,
    reporter: &Reporter,
    watched: &ChannelId,
    rescan: &mut bool,
    fut: F,
) -> Interrupt<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Interrupt::Done(out),
            input = inputs.recv() => match input {
                Some(SupervisorInput::Hotplug(HotplugEvent::Disconnected(id))) if &id == watched => {
                    return Interrupt::Unplugged;
                }
                Some(SupervisorInput::Shutdown) | None => return Interrupt::Shutdown,
                Some(SupervisorInput::Hotplug(HotplugEvent::Connected(id))) => {
                    reporter.diag(
                        DiagLevel::Info,
                        format!("{id} connected; queued until search ends"),
                    );
                    *rescan = true;
                }
                Some(other) => {
                    reporter.diag(DiagLevel::Debug, format!("busy; ignoring {other:?}"));
                }
            }
        }
    }
}
