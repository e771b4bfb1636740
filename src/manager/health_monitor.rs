//! Pure connection-state and reconnection logic
//!
//! This module contains the state machine of a broker session and the
//! decision whether to attempt another reconnection. Nothing here performs
//! I/O apart from logging transitions.

use crate::config::ReconnectConfig;
use std::fmt;
use tracing::{error, info, warn};

/// Lifecycle state of one broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// `connect()` accepted
    ConnectRequested,
    /// Every topic of the interest set acknowledged
    SubscriptionsRestored,
    /// Transport or restoration failure during `connect()`
    ConnectFailed(String),
    /// Unsolicited session loss
    ConnectionLost {
        reason: String,
        automatic_reconnect: bool,
    },
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// A reconnection attempt failed; the supervisor keeps trying
    ReconnectionFailed(String),
    /// Reconnection gave up
    PermanentFailure(String),
    /// `disconnect()` completed
    DisconnectRequested,
    /// `close()` completed
    Released,
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Pure state machine and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after a connection event (pure function)
    pub fn determine_next_state(current: ConnectionState, event: &ConnectionEvent) -> ConnectionState {
        if current == ConnectionState::Closed {
            return ConnectionState::Closed;
        }

        match event {
            ConnectionEvent::ConnectRequested => ConnectionState::Connecting,
            ConnectionEvent::SubscriptionsRestored => ConnectionState::Connected,
            ConnectionEvent::ConnectFailed(_) => ConnectionState::Disconnected,
            ConnectionEvent::ConnectionLost {
                automatic_reconnect: true,
                ..
            } => ConnectionState::Reconnecting,
            ConnectionEvent::ConnectionLost {
                automatic_reconnect: false,
                ..
            } => ConnectionState::Disconnected,
            ConnectionEvent::ReconnectionStarted(_) | ConnectionEvent::ReconnectionFailed(_) => {
                ConnectionState::Reconnecting
            }
            ConnectionEvent::PermanentFailure(_) | ConnectionEvent::DisconnectRequested => {
                ConnectionState::Disconnected
            }
            ConnectionEvent::Released => ConnectionState::Closed,
        }
    }

    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// `connect()` is accepted from these states
    pub fn can_connect(state: ConnectionState) -> bool {
        matches!(
            state,
            ConnectionState::Disconnected | ConnectionState::Reconnecting
        )
    }

    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Restoration issues subscribes before the session counts as connected
    pub fn can_subscribe(state: ConnectionState) -> bool {
        matches!(
            state,
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState, event: &ConnectionEvent) {
        match (from, to, event) {
            (_, _, _) if from == to && !matches!(event, ConnectionEvent::ReconnectionStarted(_)) => {}
            (ConnectionState::Connecting, ConnectionState::Connected, _) => {
                info!("Broker session established, all topics subscribed");
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected, _) => {
                info!("Reconnection successful, all topics resubscribed");
            }
            (_, ConnectionState::Reconnecting, ConnectionEvent::ConnectionLost { reason, .. }) => {
                warn!("Broker connection lost, reconnecting: {}", reason);
            }
            (_, ConnectionState::Reconnecting, ConnectionEvent::ReconnectionStarted(attempt)) => {
                info!("Starting reconnection attempt {}", attempt);
            }
            (_, ConnectionState::Disconnected, ConnectionEvent::ConnectionLost { reason, .. }) => {
                warn!("Broker connection lost: {}", reason);
            }
            (_, ConnectionState::Disconnected, ConnectionEvent::ConnectFailed(reason)) => {
                error!("Broker connection failed: {}", reason);
            }
            (_, ConnectionState::Disconnected, ConnectionEvent::PermanentFailure(reason)) => {
                error!("Broker connection permanently failed: {}", reason);
            }
            _ => {
                info!("Broker connection state: {} -> {}", from, to);
            }
        }
    }
}
