//! Pure routing of `rumqttc` v5 events
//!
//! Translates raw event-loop events into the small set of decisions the
//! session driver acts on.

use super::connection::from_wire_qos;
use crate::error::BrokerError;
use crate::message::{InboundMessage, QoS};
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, Packet, PubAckReason, PubRecReason, SubscribeReasonCode,
};
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an event-loop event to a driver action (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage::new(
                    String::from_utf8_lossy(&publish.topic).into_owned(),
                    publish.payload.clone(),
                    from_wire_qos(publish.qos),
                    publish.retain,
                )),
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    result: suback
                        .return_codes
                        .first()
                        .map(Self::subscribe_result)
                        .unwrap_or_else(|| {
                            Err(BrokerError::Rejected("empty SUBACK".to_string()))
                        }),
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                    result: match puback.reason {
                        PubAckReason::Success | PubAckReason::NoMatchingSubscribers => Ok(()),
                        ref other => Err(BrokerError::Rejected(format!("PUBACK {other:?}"))),
                    },
                },
                Packet::PubRec(pubrec) => match pubrec.reason {
                    PubRecReason::Success | PubRecReason::NoMatchingSubscribers => {
                        EventRoute::InfrastructureEvent(format!("PubRec {}", pubrec.pkid))
                    }
                    ref other => EventRoute::PublishAcknowledged {
                        packet_id: pubrec.pkid,
                        result: Err(BrokerError::Rejected(format!("PUBREC {other:?}"))),
                    },
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                    packet_id: pubcomp.pkid,
                    result: Ok(()),
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("Broker sent DISCONNECT: {:?}", disconnect.reason_code))
                }
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Subscribe(pkid) => EventRoute::SubscribeSent { packet_id: *pkid },
                Outgoing::Publish(pkid) => EventRoute::PublishSent { packet_id: *pkid },
                Outgoing::Disconnect => EventRoute::DisconnectSent,
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// Map a SUBACK reason code to a subscribe outcome (pure function)
    pub fn subscribe_result(code: &SubscribeReasonCode) -> Result<QoS, BrokerError> {
        match code {
            SubscribeReasonCode::Success(granted) => Ok(from_wire_qos(*granted)),
            SubscribeReasonCode::NotAuthorized => {
                Err(BrokerError::NotAuthorized("SUBACK NotAuthorized".to_string()))
            }
            SubscribeReasonCode::TopicFilterInvalid
            | SubscribeReasonCode::WildcardSubscriptionsNotSupported => {
                Err(BrokerError::InvalidTopicFilter(format!("SUBACK {code:?}")))
            }
            other => Err(BrokerError::Rejected(format!("SUBACK {other:?}"))),
        }
    }

    /// Map an event-loop error to a broker error (pure function)
    pub fn classify_connection_error(error: ConnectionError) -> BrokerError {
        match error {
            ConnectionError::ConnectionRefused(code) => match code {
                ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword => {
                    BrokerError::NotAuthorized(format!("CONNACK {code:?}"))
                }
                other => BrokerError::Refused(format!("CONNACK {other:?}")),
            },
            other => BrokerError::transport(other),
        }
    }

    /// Check granted QoS against the requested level (pure function)
    pub fn validate_grant(requested: QoS, granted: QoS) -> Result<(), BrokerError> {
        if granted < requested {
            Err(BrokerError::QosNotGranted { requested, granted })
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug)]
pub enum EventRoute {
    /// CONNACK with success - session is open
    ConnectionAcknowledged,
    /// Publish received on a subscribed topic
    MessageReceived(InboundMessage),
    /// SUBSCRIBE written to the socket
    SubscribeSent { packet_id: u16 },
    /// SUBACK for a subscribe request
    SubscriptionAcknowledged {
        packet_id: u16,
        result: Result<QoS, BrokerError>,
    },
    /// PUBLISH written to the socket
    PublishSent { packet_id: u16 },
    /// Final acknowledgment (or rejection) of a QoS 1/2 publish
    PublishAcknowledged {
        packet_id: u16,
        result: Result<(), BrokerError>,
    },
    /// Our DISCONNECT was written
    DisconnectSent,
    /// Broker closed the session
    Disconnected(String),
    /// Infrastructure event (PingResp, PubRel, ...)
    InfrastructureEvent(String),
    /// Any other outgoing packet
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{Publish, SubAck};
    use rumqttc::v5::mqttbytes::QoS as WireQoS;

    #[test]
    fn test_route_publish() {
        let publish = Publish::new("clinic/patient/booking/create", WireQoS::AtLeastOnce, "payload", None);
        let event = Event::Incoming(Packet::Publish(publish));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "clinic/patient/booking/create");
                assert_eq!(message.payload, Bytes::from("payload"));
                assert_eq!(message.qos, QoS::AtLeastOnce);
                assert!(!message.retained);
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_suback() {
        let suback = SubAck {
            pkid: 42,
            return_codes: vec![SubscribeReasonCode::Success(WireQoS::ExactlyOnce)],
            properties: None,
        };
        match MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(suback))) {
            EventRoute::SubscriptionAcknowledged { packet_id, result } => {
                assert_eq!(packet_id, 42);
                assert_eq!(result.unwrap(), QoS::ExactlyOnce);
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_outgoing() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(3))),
            EventRoute::SubscribeSent { packet_id: 3 }
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(9))),
            EventRoute::PublishSent { packet_id: 9 }
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_subscribe_result_codes() {
        assert!(matches!(
            MessageHandler::subscribe_result(&SubscribeReasonCode::NotAuthorized),
            Err(BrokerError::NotAuthorized(_))
        ));
        assert!(matches!(
            MessageHandler::subscribe_result(&SubscribeReasonCode::TopicFilterInvalid),
            Err(BrokerError::InvalidTopicFilter(_))
        ));
        assert!(matches!(
            MessageHandler::subscribe_result(&SubscribeReasonCode::QuotaExceeded),
            Err(BrokerError::Rejected(_))
        ));
    }

    #[test]
    fn test_validate_grant() {
        assert!(MessageHandler::validate_grant(QoS::AtLeastOnce, QoS::AtLeastOnce).is_ok());
        assert!(MessageHandler::validate_grant(QoS::AtMostOnce, QoS::ExactlyOnce).is_ok());
        assert!(matches!(
            MessageHandler::validate_grant(QoS::ExactlyOnce, QoS::AtMostOnce),
            Err(BrokerError::QosNotGranted { .. })
        ));
    }
}
