//! Continuous operation for scalelink: reading a validated link, blanking
//! the display when telemetry stops, and supervising the whole
//! connect / detect / read / recover cycle.

pub mod builder;
pub mod reader;
pub mod smoothing;
pub mod supervisor;

pub use builder::SupervisorBuilder;
pub use reader::{EndReason, Outputs, ReadSession, ReadSettings, SessionEnd};
pub use smoothing::SmoothingWindow;
pub use supervisor::{SupervisorHandle, SupervisorInput};
