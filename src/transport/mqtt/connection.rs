//! Pure MQTT option construction and QoS mapping
//!
//! This module contains pure functions translating our connection parameters
//! into `rumqttc` options.

use crate::config::ConnectionConfig;
use crate::message::QoS;
use rumqttc::v5::{mqttbytes::QoS as WireQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;

/// Request channel capacity between `AsyncClient` and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Maximum inbound packet size accepted from the broker
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Pure function building `rumqttc` options for one session
pub fn configure_mqtt_options(config: &ConnectionConfig, clean_start: bool) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(config.client_id(), config.host(), config.port());

    if config.uses_tls() {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = config.credentials() {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_clean_start(clean_start);
    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    mqtt_options
}

pub fn to_wire_qos(qos: QoS) -> WireQoS {
    match qos {
        QoS::AtMostOnce => WireQoS::AtMostOnce,
        QoS::AtLeastOnce => WireQoS::AtLeastOnce,
        QoS::ExactlyOnce => WireQoS::ExactlyOnce,
    }
}

pub fn from_wire_qos(qos: WireQoS) -> QoS {
    match qos {
        WireQoS::AtMostOnce => QoS::AtMostOnce,
        WireQoS::AtLeastOnce => QoS::AtLeastOnce,
        WireQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new("mqtt://localhost:1884", "options-test", QoS::AtLeastOnce)
            .unwrap()
            .with_keep_alive(Duration::from_secs(30))
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_config(), false);
        assert_eq!(options.client_id(), "options-test");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(!options.clean_start());

        let clean = configure_mqtt_options(&test_config(), true);
        assert!(clean.clean_start());
    }

    #[test]
    fn test_qos_mapping_round_trip() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_wire_qos(to_wire_qos(qos)), qos);
        }
    }
}
