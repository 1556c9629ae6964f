//! scalelink-test-harness: Simulated devices for testing scalelink.
//!
//! This crate provides [`MockChannel`] for deterministic testing of
//! detection and reading without real scale hardware, and
//! [`MockAuthorizer`] for driving the supervisor through its
//! authorization states.

pub mod mock_authorizer;
pub mod mock_channel;

pub use mock_authorizer::MockAuthorizer;
pub use mock_channel::MockChannel;
