//! Asynchronous scale events.
//!
//! Events are emitted through a `tokio::sync::broadcast` channel as the
//! supervisor changes state and as lines arrive. Presentation layers
//! subscribe to these for status, weight and log updates.

use std::fmt;

use crate::diag::DiagnosticEntry;
use crate::types::{ChannelId, LinkConfig, ScaleFlag, Telegram, TelegramFormat};

/// How an active channel was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    /// A telegram decoded under the selected configuration.
    Telemetry,
    /// Only the loopback test passed: the link is wired but nothing decodes.
    LinkOnly,
}

/// Supervisor lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    EnumeratingChannels,
    /// No channel is authorized; waiting for an external gesture.
    AwaitingAuthorization,
    Probing(ChannelId),
    LoopbackTesting(ChannelId),
    Active { channel: ChannelId, mode: ActiveMode },
    Disconnected(ChannelId),
    Error(String),
}

impl LinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, LinkState::Active { .. })
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => f.write_str("idle"),
            LinkState::EnumeratingChannels => f.write_str("enumerating channels"),
            LinkState::AwaitingAuthorization => f.write_str("awaiting authorization"),
            LinkState::Probing(id) => write!(f, "probing {id}"),
            LinkState::LoopbackTesting(id) => write!(f, "loopback testing {id}"),
            LinkState::Active {
                channel,
                mode: ActiveMode::Telemetry,
            } => write!(f, "reading {channel}"),
            LinkState::Active {
                channel,
                mode: ActiveMode::LinkOnly,
            } => write!(f, "link confirmed on {channel}, no telemetry"),
            LinkState::Disconnected(id) => write!(f, "disconnected from {id}"),
            LinkState::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// External hot-plug notification for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Connected(ChannelId),
    Disconnected(ChannelId),
}

/// An event emitted while detecting or reading a scale.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events when telegrams arrive quickly.
#[derive(Debug, Clone)]
pub enum ScaleEvent {
    /// The supervisor moved to a new state.
    StateChanged(LinkState),

    /// A link configuration was selected for continuous reading.
    ConfigSelected {
        channel: ChannelId,
        config: LinkConfig,
        mode: ActiveMode,
    },

    /// A framed, trimmed, non-empty line arrived.
    Line(Telegram),

    /// A line decoded to a weight.
    Weight {
        /// Value decoded from this line.
        value: f64,
        /// Moving average when smoothing is enabled, otherwise `value`.
        smoothed: f64,
        format: TelegramFormat,
        flag: Option<ScaleFlag>,
    },

    /// A line matched no telegram format.
    Ignored { raw_line: String },

    /// No valid telegram arrived within the idle timeout; the displayed
    /// weight was reset.
    IdleReset,

    /// A diagnostic log entry was appended.
    Diagnostic(DiagnosticEntry),
}

/// Latest presentation state, readable through a `watch` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: String,
    pub config_label: Option<String>,
    pub last_line: Option<String>,
    pub weight: Option<f64>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        StatusSnapshot {
            status: LinkState::Idle.to_string(),
            config_label: None,
            last_line: None,
            weight: None,
        }
    }
}
