//! Testing utilities and mock implementations
//!
//! Lets the connection manager and the sinks be exercised without a running
//! broker.

pub mod mocks;

pub use mocks::*;
