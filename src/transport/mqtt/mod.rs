//! MQTT v5 broker client built on `rumqttc`
//!
//! The module is split into focused sub-modules:
//!
//! - [`connection`] - Pure option construction and QoS mapping
//! - [`message_handler`] - Pure routing of event-loop events
//! - [`client`] - Impure I/O: session driver and the [`BrokerClient`](crate::transport::BrokerClient) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use broker_link::config::ConnectionConfig;
//! use broker_link::message::QoS;
//! use broker_link::transport::{BrokerClient, MqttBrokerClient};
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::new("mqtt://localhost:1883", "my-service", QoS::AtLeastOnce)?;
//! let client = MqttBrokerClient::new(config);
//! let mut events = client.connect(true).await?;
//! client.subscribe("clinic/patient/#", QoS::AtLeastOnce).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttBrokerClient;
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};
