//! scalelink-core: Core traits, types, and error definitions for scalelink.
//!
//! This crate defines the device-agnostic abstractions the detection and
//! monitoring crates are built on. Presentation layers depend on these
//! types without pulling in a serial driver.
//!
//! # Key types
//!
//! - [`LinkConfig`] -- one candidate set of serial link parameters
//! - [`Channel`] -- byte-level duplex link to a scale
//! - [`Authorizer`] -- source of channels the core may open
//! - [`ScaleEvent`] -- asynchronous state and weight notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod diag;
pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use scalelink_core::*`.
pub use diag::{DEFAULT_LOG_CAPACITY, DiagLevel, DiagnosticEntry, DiagnosticLog};
pub use error::{Error, Result};
pub use events::{ActiveMode, HotplugEvent, LinkState, ScaleEvent, StatusSnapshot};
pub use helpers::{WEIGHT_PLACEHOLDER, format_weight};
pub use transport::{Authorizer, Channel, Signals};
pub use types::*;
