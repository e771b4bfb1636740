//! Typed errors for every broker session operation
//!
//! Each public operation of the connection manager has its own error enum so
//! callers can match on exactly the failures that operation can produce.
//! All of them can be turned into a [`Diagnostic`](crate::observability::Diagnostic)
//! through [`ReasonCode`].

use crate::manager::ConnectionState;
use crate::message::QoS;
use crate::topics::TopicError;
use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by the broker-client capability itself
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Transport failure: {0}")]
    Transport(#[source] BoxError),
    #[error("Connection refused by broker: {0}")]
    Refused(String),
    #[error("Not authorized: {0}")]
    NotAuthorized(String),
    #[error("Topic filter rejected by broker: {0}")]
    InvalidTopicFilter(String),
    #[error("Broker granted QoS {granted} but {requested} was requested")]
    QosNotGranted { requested: QoS, granted: QoS },
    #[error("Operation rejected by broker: {0}")]
    Rejected(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("No broker session is open")]
    NotConnected,
    #[error("Broker client has been closed")]
    Closed,
}

impl BrokerError {
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}

/// Any operation attempted after `close()`
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Connection manager is closed")]
pub struct ClosedError;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Broker unreachable")]
    Unreachable(#[source] BrokerError),
    #[error("Authentication rejected")]
    AuthenticationRejected(#[source] BrokerError),
    #[error("Connection refused")]
    Refused(#[source] BrokerError),
    #[error("No connection acknowledgment within {0:?}")]
    Timeout(Duration),
    #[error("Subscription restoration failed on '{topic}'")]
    Restoration {
        topic: String,
        #[source]
        source: SubscribeError,
    },
    #[error("Cannot connect from state {state}")]
    InvalidState { state: ConnectionState },
    #[error(transparent)]
    Closed(#[from] ClosedError),
}

impl From<BrokerError> for ConnectError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::NotAuthorized(_) => ConnectError::AuthenticationRejected(error),
            BrokerError::Refused(_) => ConnectError::Refused(error),
            BrokerError::Closed => ConnectError::Closed(ClosedError),
            other => ConnectError::Unreachable(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Invalid topic filter")]
    InvalidFilter(#[from] TopicError),
    #[error("QoS {requested} not permitted on '{topic}' (granted {granted})")]
    QosNotPermitted {
        topic: String,
        requested: QoS,
        granted: QoS,
    },
    #[error("Subscription to '{topic}' rejected")]
    Rejected {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("No subscription acknowledgment for '{topic}' within {after:?}")]
    Timeout { topic: String, after: Duration },
    #[error("Cannot subscribe in state {state}")]
    NotConnected { state: ConnectionState },
    #[error(transparent)]
    Closed(#[from] ClosedError),
}

impl SubscribeError {
    pub(crate) fn from_broker(topic: &str, error: BrokerError) -> Self {
        match error {
            BrokerError::QosNotGranted { requested, granted } => SubscribeError::QosNotPermitted {
                topic: topic.to_string(),
                requested,
                granted,
            },
            BrokerError::Closed => SubscribeError::Closed(ClosedError),
            other => SubscribeError::Rejected {
                topic: topic.to_string(),
                source: other,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Invalid topic name")]
    InvalidTopic(#[from] TopicError),
    #[error("Publish to '{topic}' rejected")]
    Rejected {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("No publish acknowledgment for '{topic}' within {after:?}")]
    Timeout { topic: String, after: Duration },
    #[error(transparent)]
    Closed(#[from] ClosedError),
}

#[derive(Debug, Error)]
pub enum DisconnectError {
    #[error("Transport failure during graceful close")]
    Transport(#[source] BrokerError),
    #[error("No disconnect acknowledgment within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Closed(#[from] ClosedError),
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("close() requires a prior disconnect() - current state: {state}")]
    NotDisconnected { state: ConnectionState },
    #[error("Failed to release transport")]
    Transport(#[source] BrokerError),
    #[error(transparent)]
    Closed(#[from] ClosedError),
}

/// Stable, machine-readable reason code for diagnostics
pub trait ReasonCode {
    fn reason_code(&self) -> &'static str;
}

impl ReasonCode for BrokerError {
    fn reason_code(&self) -> &'static str {
        match self {
            BrokerError::Transport(_) => "transport_failure",
            BrokerError::Refused(_) => "connection_refused",
            BrokerError::NotAuthorized(_) => "not_authorized",
            BrokerError::InvalidTopicFilter(_) => "invalid_topic_filter",
            BrokerError::QosNotGranted { .. } => "qos_not_granted",
            BrokerError::Rejected(_) => "rejected",
            BrokerError::ConnectionLost(_) => "connection_lost",
            BrokerError::NotConnected => "not_connected",
            BrokerError::Closed => "closed",
        }
    }
}

impl ReasonCode for ClosedError {
    fn reason_code(&self) -> &'static str {
        "closed"
    }
}

impl ReasonCode for ConnectError {
    fn reason_code(&self) -> &'static str {
        match self {
            ConnectError::Unreachable(_) => "connect_unreachable",
            ConnectError::AuthenticationRejected(_) => "connect_auth_rejected",
            ConnectError::Refused(_) => "connect_refused",
            ConnectError::Timeout(_) => "connect_timeout",
            ConnectError::Restoration { .. } => "connect_restoration_failed",
            ConnectError::InvalidState { .. } => "connect_invalid_state",
            ConnectError::Closed(_) => "closed",
        }
    }
}

impl ReasonCode for SubscribeError {
    fn reason_code(&self) -> &'static str {
        match self {
            SubscribeError::InvalidFilter(_) => "subscribe_invalid_filter",
            SubscribeError::QosNotPermitted { .. } => "subscribe_qos_not_permitted",
            SubscribeError::Rejected { .. } => "subscribe_rejected",
            SubscribeError::Timeout { .. } => "subscribe_timeout",
            SubscribeError::NotConnected { .. } => "subscribe_not_connected",
            SubscribeError::Closed(_) => "closed",
        }
    }
}

impl ReasonCode for PublishError {
    fn reason_code(&self) -> &'static str {
        match self {
            PublishError::NotConnected { .. } => "publish_not_connected",
            PublishError::InvalidTopic(_) => "publish_invalid_topic",
            PublishError::Rejected { .. } => "publish_rejected",
            PublishError::Timeout { .. } => "publish_timeout",
            PublishError::Closed(_) => "closed",
        }
    }
}

impl ReasonCode for DisconnectError {
    fn reason_code(&self) -> &'static str {
        match self {
            DisconnectError::Transport(_) => "disconnect_transport_failure",
            DisconnectError::Timeout(_) => "disconnect_timeout",
            DisconnectError::Closed(_) => "closed",
        }
    }
}

impl ReasonCode for CloseError {
    fn reason_code(&self) -> &'static str {
        match self {
            CloseError::NotDisconnected { .. } => "close_not_disconnected",
            CloseError::Transport(_) => "close_transport_failure",
            CloseError::Closed(_) => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_broker_error_maps_to_connect_error() {
        assert!(matches!(
            ConnectError::from(BrokerError::NotAuthorized("bad password".into())),
            ConnectError::AuthenticationRejected(_)
        ));
        assert!(matches!(
            ConnectError::from(BrokerError::Refused("server unavailable".into())),
            ConnectError::Refused(_)
        ));
        assert!(matches!(
            ConnectError::from(BrokerError::ConnectionLost("reset".into())),
            ConnectError::Unreachable(_)
        ));
        assert!(matches!(
            ConnectError::from(BrokerError::Closed),
            ConnectError::Closed(ClosedError)
        ));
    }

    #[test]
    fn test_subscribe_error_from_broker() {
        let error = SubscribeError::from_broker(
            "a/b",
            BrokerError::QosNotGranted {
                requested: QoS::ExactlyOnce,
                granted: QoS::AtLeastOnce,
            },
        );
        assert!(matches!(
            error,
            SubscribeError::QosNotPermitted {
                requested: QoS::ExactlyOnce,
                granted: QoS::AtLeastOnce,
                ..
            }
        ));

        let error = SubscribeError::from_broker("a/b", BrokerError::InvalidTopicFilter("a/b".into()));
        assert_eq!(error.reason_code(), "subscribe_rejected");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_error_display() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(ConnectError::Timeout(Duration::from_secs(10))),
            Box::new(SubscribeError::Timeout {
                topic: "a/b".into(),
                after: Duration::from_secs(10),
            }),
            Box::new(PublishError::NotConnected {
                state: ConnectionState::Disconnected,
            }),
            Box::new(DisconnectError::Timeout(Duration::from_secs(1))),
            Box::new(CloseError::NotDisconnected {
                state: ConnectionState::Connected,
            }),
            Box::new(ClosedError),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_publish_not_connected_mentions_state() {
        let error = PublishError::NotConnected {
            state: ConnectionState::Reconnecting,
        };
        assert_eq!(error.to_string(), "Not connected - current state: reconnecting");
        assert_eq!(error.reason_code(), "publish_not_connected");
    }

    #[test]
    fn test_transport_helper_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = BrokerError::transport(io);
        assert_eq!(error.reason_code(), "transport_failure");
        assert!(error.source().is_some());
    }
}
