//! Serial transport for scalelink.
//!
//! This crate provides the concrete [`Channel`](scalelink_core::Channel)
//! and [`Authorizer`](scalelink_core::Authorizer) implementations for real
//! hardware:
//!
//! - [`SerialChannel`]: USB virtual COM ports and RS-232 serial connections
//! - [`SerialAuthorizer`]: which system ports the core may probe
//! - [`HotplugWatcher`]: polls the port list and reports arrivals/removals
//!
//! # Example
//!
//! ```no_run
//! use scalelink_core::Authorizer;
//! use scalelink_transport::{PortFilter, SerialAuthorizer};
//!
//! # async fn example() -> scalelink_core::Result<()> {
//! let mut auth = SerialAuthorizer::new(PortFilter { usb_only: true, allow: None });
//! for channel in auth.list_authorized().await? {
//!     println!("{}", channel.id());
//! }
//! # Ok(())
//! # }
//! ```

pub mod ports;
pub mod serial;

pub use ports::{
    DEFAULT_POLL_INTERVAL, HotplugHandle, HotplugWatcher, PortFilter, SerialAuthorizer,
    diff_ports, list_ports,
};
pub use serial::{FlowControl, SerialChannel};
