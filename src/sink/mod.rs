//! Receivers for delivered messages and connection lifecycle notifications
//!
//! The connection manager calls [`MessageCallbackSink::on_message`] from its
//! delivery task, once per inbound message, in broker order. Implementations
//! must return promptly: long-running work belongs on a worker pool (see
//! [`TopicRouter`]), otherwise later deliveries queue up behind it.

use crate::message::InboundMessage;
use crate::observability::Diagnostic;
use async_trait::async_trait;

pub mod channel;
pub mod logging;
pub mod router;

pub use channel::ChannelSink;
pub use logging::LoggingSink;
pub use router::{TopicHandler, TopicRouter};

/// Application-supplied receiver for broker traffic
#[async_trait]
pub trait MessageCallbackSink: Send + Sync {
    /// Called once for every message delivered on a subscription
    async fn on_message(&self, message: InboundMessage);

    /// Session is open and every configured topic is subscribed
    fn on_connected(&self) {}

    /// Session ended, either requested or unsolicited without reconnect
    fn on_disconnected(&self, _reason: &str) {}

    /// Automatic reconnection attempt `attempt` (1-based) is about to start
    fn on_reconnecting(&self, _attempt: u32) {}

    /// A publish failed after reaching the transport
    fn on_delivery_failed(&self, _diagnostic: &Diagnostic) {}
}
