//! scalelink-detect: discovering how a scale is wired.
//!
//! - [`space`] -- the ordered set of candidate link configurations
//! - [`probe`] -- listening for telemetry under one or all candidates
//! - [`loopback`] -- the echo test used when nothing decodes

pub mod loopback;
pub mod probe;
pub mod space;

pub use loopback::{LoopbackTester, default_loopback_config};
pub use probe::{DEFAULT_PROBE_WINDOW, Detection, MissReason, ProbeEngine, ProbeResult};
pub use space::{DEFAULT_BAUD_RATES, DEFAULT_FRAMINGS, ParameterSpace, ParameterSpaceBuilder};
