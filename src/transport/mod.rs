//! Broker-client capability
//!
//! [`BrokerClient`] is the black-box boundary between the connection manager
//! and the wire protocol. Every method resolves only once the broker has
//! acknowledged the operation (or the operation failed); the manager applies
//! its own timeout around each call. Implementations hold no subscription
//! state of their own.

use crate::error::BrokerError;
use crate::message::{InboundMessage, QoS};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod pending;

/// Buffer size of the per-session event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Unsolicited traffic from an open session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A publish arrived on one of our subscriptions
    Message(InboundMessage),
    /// The session ended without a `disconnect()` request
    ConnectionLost(String),
}

/// Abstract broker-client capability
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Open a transport session and wait for the broker's acknowledgment.
    ///
    /// Returns the receiving end of the session's event stream. A previous
    /// session, if any, is torn down first.
    async fn connect(&self, clean_start: bool)
        -> Result<mpsc::Receiver<TransportEvent>, BrokerError>;

    /// Subscribe to one filter and wait for the acknowledgment
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError>;

    /// Publish one payload. QoS 0 resolves once handed to the transport,
    /// QoS 1/2 once the broker completed the handshake.
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError>;

    /// Gracefully close the session. Succeeds when no session is open.
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Release the underlying transport resource; terminal.
    async fn close(&self) -> Result<(), BrokerError>;
}

pub use mqtt::MqttBrokerClient;
