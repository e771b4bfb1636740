//! broker-link - persistent broker sessions for microservices
//!
//! Maintains one publish/subscribe broker session on behalf of a service,
//! restores a fixed, ordered set of topic subscriptions whenever the session
//! is (re)established, and forwards every received message to an
//! application-supplied sink.
//!
//! # Overview
//!
//! - [`BrokerConnectionManager`] - connection lifecycle, ordered
//!   (re)subscription, QoS-aware publish/subscribe, clean shutdown
//! - [`MessageCallbackSink`] - receiver for messages and lifecycle events,
//!   with [`LoggingSink`](sink::LoggingSink), [`TopicRouter`](sink::TopicRouter)
//!   and [`ChannelSink`](sink::ChannelSink) provided
//! - [`BrokerClient`](transport::BrokerClient) - the broker-client capability,
//!   implemented over MQTT v5 by [`MqttBrokerClient`]
//!
//! # Quick Start
//!
//! ```rust
//! use broker_link::testing::{MockBroker, RecordingSink};
//! use broker_link::{BrokerConnectionManager, ConnectionConfig, QoS, TopicInterest};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::new("mqtt://localhost:1883", "booking-service", QoS::AtLeastOnce)?;
//! let topics = TopicInterest::from_filters(["clinic/patient/booking/+", "clinic/dentist/#"])?;
//! let sink = Arc::new(RecordingSink::new());
//!
//! let manager = BrokerConnectionManager::new(MockBroker::new(), config, topics, sink);
//! manager.connect(true, true).await?;
//! assert_eq!(
//!     manager.subscribed_topics(),
//!     vec!["clinic/patient/booking/+", "clinic/dentist/#"]
//! );
//!
//! manager.publish("clinic/patient/booking/create", "{}", QoS::AtLeastOnce).await?;
//! manager.disconnect().await?;
//! manager.close().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod observability;
pub mod sink;
pub mod testing;
pub mod topics;
pub mod transport;

pub use config::{ConfigError, ConnectionConfig, ReconnectConfig, ServiceConfig};
pub use error::{
    BrokerError, CloseError, ClosedError, ConnectError, DisconnectError, PublishError,
    ReasonCode, SubscribeError,
};
pub use manager::{run_scoped, BrokerConnectionManager, ConnectionState};
pub use message::{InboundMessage, QoS};
pub use sink::MessageCallbackSink;
pub use topics::{TopicError, TopicInterest};
pub use transport::MqttBrokerClient;
