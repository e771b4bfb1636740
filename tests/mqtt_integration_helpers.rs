//! MQTT Integration Test Helpers
//!
//! Tests using these helpers talk to a real broker at `MQTT_TEST_BROKER`,
//! defaulting to localhost:1883, and are `#[ignore]`d otherwise.

use broker_link::config::ConnectionConfig;
use broker_link::message::{InboundMessage, QoS};
use broker_link::transport::TransportEvent;
use std::time::Duration;
use tokio::sync::mpsc;

pub const MQTT_BROKER_URL: &str = "mqtt://localhost:1883";
pub const BROKER_ENV: &str = "MQTT_TEST_BROKER";

pub fn broker_url() -> String {
    std::env::var(BROKER_ENV).unwrap_or_else(|_| MQTT_BROKER_URL.to_string())
}

/// Client ids and topic roots that don't collide across runs sharing a broker
pub fn unique(prefix: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{}-{nanos}", std::process::id())
}

pub fn mqtt_config(client_id: &str) -> ConnectionConfig {
    ConnectionConfig::new(&broker_url(), client_id, QoS::AtLeastOnce)
        .expect("valid broker url")
        .with_operation_timeout(Duration::from_secs(5))
}

/// Next inbound message on a session, or `None` on loss or timeout
#[allow(dead_code)]
pub async fn next_message(
    events: &mut mpsc::Receiver<TransportEvent>,
    within: Duration,
) -> Option<InboundMessage> {
    match tokio::time::timeout(within, events.recv()).await {
        Ok(Some(TransportEvent::Message(message))) => Some(message),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids_differ() {
        assert_ne!(unique("it"), unique("it"));
    }

    #[test]
    fn test_mqtt_config_points_at_broker() {
        let config = mqtt_config("helper-test");
        assert_eq!(config.client_id(), "helper-test");
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
    }
}
