//! Provided sinks driven end to end through the connection manager

use async_trait::async_trait;
use broker_link::config::ConnectionConfig;
use broker_link::manager::BrokerConnectionManager;
use broker_link::message::{InboundMessage, QoS};
use broker_link::sink::{ChannelSink, LoggingSink, TopicHandler, TopicRouter};
use broker_link::testing::MockBroker;
use broker_link::topics::TopicInterest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> ConnectionConfig {
    ConnectionConfig::new("mqtt://localhost:1883", "sink-test", QoS::AtLeastOnce)
        .unwrap()
        .with_operation_timeout(Duration::from_millis(200))
}

struct Forward {
    label: &'static str,
    tx: mpsc::UnboundedSender<(&'static str, String)>,
}

#[async_trait]
impl TopicHandler for Forward {
    async fn handle(
        &self,
        message: InboundMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.tx.send((self.label, message.topic))?;
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl TopicHandler for Failing {
    async fn handle(
        &self,
        _message: InboundMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("booking store unavailable".into())
    }
}

#[tokio::test]
async fn test_router_dispatches_by_filter() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let router = Arc::new(
        TopicRouter::new(4)
            .route(
                "clinic/patient/booking/create",
                Forward {
                    label: "create",
                    tx: tx.clone(),
                },
            )
            .unwrap()
            .route("clinic/patient/booking/+", Forward { label: "other", tx })
            .unwrap()
            .route("clinic/fail/#", Failing)
            .unwrap(),
    );

    let broker = MockBroker::new();
    let manager = BrokerConnectionManager::new(
        broker.clone(),
        config(),
        TopicInterest::from_filters(["clinic/patient/booking/+", "clinic/fail/#"]).unwrap(),
        router.clone(),
    );
    manager.connect(true, true).await.unwrap();

    broker.deliver("clinic/patient/booking/create", "{}", QoS::AtLeastOnce);
    broker.deliver("clinic/patient/booking/delete", "{}", QoS::AtLeastOnce);
    broker.deliver("clinic/fail/now", "{}", QoS::AtLeastOnce);
    broker.deliver("clinic/unrouted", "{}", QoS::AtLeastOnce);

    let mut seen = Vec::new();
    for _ in 0..2 {
        let item = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        seen.push(item);
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("create", "clinic/patient/booking/create".to_string()),
            ("other", "clinic/patient/booking/delete".to_string()),
        ]
    );

    // A failing handler doesn't stop delivery
    broker.deliver("clinic/patient/booking/update", "{}", QoS::AtLeastOnce);
    let item = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(item.0, "other");

    manager.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(router.drain(Duration::from_secs(1)).await, 0);
}

#[tokio::test]
async fn test_channel_sink_preserves_order() {
    let (sink, mut rx) = ChannelSink::channel(64);
    let broker = MockBroker::new();
    let manager = BrokerConnectionManager::new(
        broker.clone(),
        config(),
        TopicInterest::from_filters(["telemetry/#"]).unwrap(),
        Arc::new(sink),
    );
    manager.connect(true, true).await.unwrap();

    for i in 0..10 {
        broker.deliver("telemetry/chair/3", i.to_string(), QoS::AtMostOnce);
    }

    for i in 0..10 {
        let message = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.payload_lossy(), i.to_string());
    }
}

#[tokio::test]
async fn test_logging_sink_survives_lifecycle() {
    let broker = MockBroker::new();
    let manager = BrokerConnectionManager::new(
        broker.clone(),
        config(),
        TopicInterest::from_filters(["#"]).unwrap(),
        Arc::new(LoggingSink::new()),
    );

    manager.connect(true, true).await.unwrap();
    assert!(broker.deliver("any/topic", vec![0xffu8, 0xfe], QoS::AtMostOnce));
    manager.disconnect().await.unwrap();
    manager.close().await.unwrap();
    assert!(broker.is_closed());
}
