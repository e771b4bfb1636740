//! Connection lifecycle and subscription-restoration state machine
//!
//! - [`health_monitor`] - Pure state transitions and reconnection decisions
//! - [`lifecycle`] - [`BrokerConnectionManager`] and its session supervisor
//! - [`scoped`] - [`run_scoped`] for guaranteed release

pub mod health_monitor;
pub mod lifecycle;
pub mod scoped;

pub use health_monitor::{ConnectionEvent, ConnectionState, HealthMonitor, ReconnectionDecision};
pub use lifecycle::BrokerConnectionManager;
pub use scoped::run_scoped;
