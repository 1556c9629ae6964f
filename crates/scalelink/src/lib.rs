//! # scalelink -- Serial Link Auto-Detection for Weighing Scales
//!
//! `scalelink` finds and reads an industrial weighing indicator on a serial
//! line without being told its baud rate, framing or line terminator. It
//! probes candidate configurations until a telegram decodes, falls back to
//! a loopback test to tell a dead link from a silent device, and then
//! keeps reading, blanking the weight when telemetry stops.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scalelink::{ScaleEvent, SupervisorBuilder, format_weight};
//!
//! #[tokio::main]
//! async fn main() -> scalelink::Result<()> {
//!     let handle = SupervisorBuilder::new().smoothing(3).build().await?;
//!     let mut events = handle.subscribe();
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ScaleEvent::Weight { value, .. } = event {
//!             println!("{}", format_weight(Some(value)));
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! A single port can also be searched directly:
//!
//! ```no_run
//! use scalelink::detect::ProbeEngine;
//! use scalelink::text_io::ChannelSession;
//! use scalelink::transport::SerialChannel;
//!
//! # async fn example() {
//! let mut session = ChannelSession::new(Box::new(SerialChannel::new("/dev/ttyUSB0")));
//! if let Some(found) = ProbeEngine::default().auto_detect(&mut session).await {
//!     println!("{} -> {}", found.config, found.sample.raw_line);
//! }
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate                    | Purpose                                              |
//! |--------------------------|------------------------------------------------------|
//! | `scalelink-core`         | Types, errors, the [`Channel`] and [`Authorizer`] traits, events |
//! | `scalelink-transport`    | Serial channel, port listing, hot-plug polling       |
//! | `scalelink-text-io`      | Line framing, telegram decoding, channel sessions    |
//! | `scalelink-detect`       | Parameter space, probing, loopback test              |
//! | `scalelink-monitor`      | Read session, idle watchdog, supervisor              |
//! | **`scalelink`**          | This facade crate -- re-exports everything           |

pub use scalelink_core::*;

pub use scalelink_monitor::{SupervisorBuilder, SupervisorHandle, SupervisorInput};

/// Serial ports: [`SerialChannel`](transport::SerialChannel),
/// [`SerialAuthorizer`](transport::SerialAuthorizer) and
/// [`HotplugWatcher`](transport::HotplugWatcher).
pub mod transport {
    pub use scalelink_transport::*;
}

/// Line framing and telegram decoding over a [`Channel`].
pub mod text_io {
    pub use scalelink_text_io::*;
}

/// Searching a channel for a working configuration.
pub mod detect {
    pub use scalelink_detect::*;
}

/// Continuous reading and the connection supervisor.
pub mod monitor {
    pub use scalelink_monitor::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalelink_test_harness::MockChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn facade_paths_reach_every_layer() {
        let cfg = LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::Lf).unwrap();
        let mock = MockChannel::new("COM1").script_any(b"ST,GS,+0012.50kg\n");
        let mut session = text_io::ChannelSession::new(Box::new(mock))
            .with_guard_pause(Duration::ZERO);

        let engine = detect::ProbeEngine::default();
        let result = engine.probe(&mut session, cfg, Duration::from_millis(50)).await;
        let sample = result.sample().unwrap();
        assert_eq!(format_weight(sample.weight), "12.500");
        assert_eq!(sample.format, Some(TelegramFormat::GenericDecimal));
    }
}
