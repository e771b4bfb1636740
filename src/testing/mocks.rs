//! Mock implementations for testing
//!
//! [`MockBroker`] implements [`BrokerClient`] in memory: it records every
//! operation, can be scripted to fail connects, reject or stall individual
//! filters, downgrade granted QoS, inject messages and drop the session.
//! [`RecordingSink`] keeps every sink callback for later assertions.

use crate::error::BrokerError;
use crate::message::{InboundMessage, QoS};
use crate::observability::Diagnostic;
use crate::sink::MessageCallbackSink;
use crate::transport::{BrokerClient, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// One call made against the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    Connect { clean_start: bool },
    Subscribe { filter: String, qos: QoS },
    Publish { topic: String, payload: Bytes, qos: QoS },
    Disconnect,
    Close,
}

#[derive(Default)]
struct MockState {
    operations: Vec<BrokerOp>,
    events: Option<mpsc::Sender<TransportEvent>>,
    connect_failures: VecDeque<BrokerError>,
    offline: VecDeque<InboundMessage>,
    rejected_filters: HashSet<String>,
    stalled_filters: HashSet<String>,
    granted_qos: HashMap<String, QoS>,
    reject_publishes: bool,
    stall_disconnect: bool,
    closed: bool,
}

/// In-memory broker client
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Scripted SUBACK for `filter`; `None` never acknowledges
    fn subscribe_outcome(
        state: &MockState,
        filter: &str,
        qos: QoS,
    ) -> Option<Result<(), BrokerError>> {
        if state.stalled_filters.contains(filter) {
            return None;
        }
        if state.rejected_filters.contains(filter) {
            return Some(Err(BrokerError::InvalidTopicFilter(filter.to_string())));
        }
        let granted = state.granted_qos.get(filter).copied().unwrap_or(qos);
        if granted < qos {
            return Some(Err(BrokerError::QosNotGranted {
                requested: qos,
                granted,
            }));
        }
        Some(Ok(()))
    }

    /// Fail the next `count` connects as if the broker were unreachable
    pub fn fail_next_connects(&self, count: usize) {
        self.with_state(|state| {
            for _ in 0..count {
                state.connect_failures.push_back(BrokerError::transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
        });
    }

    /// Forget any scripted connect failures
    pub fn clear_connect_failures(&self) {
        self.with_state(|state| state.connect_failures.clear());
    }

    /// Fail the next connect with `error`
    pub fn fail_next_connect(&self, error: BrokerError) {
        self.with_state(|state| state.connect_failures.push_back(error));
    }

    /// SUBACK with a failure reason code for `filter`
    pub fn reject_filter(&self, filter: &str) {
        self.with_state(|state| {
            state.rejected_filters.insert(filter.to_string());
        });
    }

    /// Never acknowledge subscribes to `filter`
    pub fn stall_filter(&self, filter: &str) {
        self.with_state(|state| {
            state.stalled_filters.insert(filter.to_string());
        });
    }

    /// Grant `qos` for `filter` regardless of what was requested
    pub fn grant_qos(&self, filter: &str, qos: QoS) {
        self.with_state(|state| {
            state.granted_qos.insert(filter.to_string(), qos);
        });
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.with_state(|state| state.reject_publishes = reject);
    }

    /// Never acknowledge DISCONNECT
    pub fn stall_disconnect(&self, stall: bool) {
        self.with_state(|state| state.stall_disconnect = stall);
    }

    /// Inject a message on the open session; false when no session is open
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>, qos: QoS) -> bool {
        let message = InboundMessage::new(topic, payload, qos, false);
        self.with_state(|state| match &state.events {
            Some(events) => events.try_send(TransportEvent::Message(message)).is_ok(),
            None => false,
        })
    }

    /// Queue a message that the broker hands over on the next subscribe,
    /// ahead of its acknowledgment, the way a persistent session flushes
    /// traffic stored while the client was away
    pub fn queue_offline(&self, topic: &str, payload: impl Into<Bytes>, qos: QoS) {
        let message = InboundMessage::new(topic, payload, qos, false);
        self.with_state(|state| state.offline.push_back(message));
    }

    /// Simulate an unsolicited loss of the open session
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.with_state(|state| match state.events.take() {
            Some(events) => events
                .try_send(TransportEvent::ConnectionLost(reason.to_string()))
                .is_ok(),
            None => false,
        })
    }

    pub fn operations(&self) -> Vec<BrokerOp> {
        self.with_state(|state| state.operations.clone())
    }

    pub fn clear_operations(&self) {
        self.with_state(|state| state.operations.clear());
    }

    /// Filters of every subscribe request, in issue order
    pub fn subscriptions(&self) -> Vec<String> {
        self.with_state(|state| {
            state
                .operations
                .iter()
                .filter_map(|op| match op {
                    BrokerOp::Subscribe { filter, .. } => Some(filter.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn published(&self) -> Vec<(String, Bytes, QoS)> {
        self.with_state(|state| {
            state
                .operations
                .iter()
                .filter_map(|op| match op {
                    BrokerOp::Publish {
                        topic,
                        payload,
                        qos,
                    } => Some((topic.clone(), payload.clone(), *qos)),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn connect_count(&self) -> usize {
        self.with_state(|state| {
            state
                .operations
                .iter()
                .filter(|op| matches!(op, BrokerOp::Connect { .. }))
                .count()
        })
    }

    pub fn is_connected(&self) -> bool {
        self.with_state(|state| state.events.is_some())
    }

    pub fn is_closed(&self) -> bool {
        self.with_state(|state| state.closed)
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(
        &self,
        clean_start: bool,
    ) -> Result<mpsc::Receiver<TransportEvent>, BrokerError> {
        self.with_state(|state| {
            state.operations.push(BrokerOp::Connect { clean_start });
            if state.closed {
                return Err(BrokerError::Closed);
            }
            if let Some(error) = state.connect_failures.pop_front() {
                return Err(error);
            }
            let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            state.events = Some(events_tx);
            Ok(events_rx)
        })
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        let (flush, outcome) = self.with_state(|state| {
            state.operations.push(BrokerOp::Subscribe {
                filter: filter.to_string(),
                qos,
            });
            if state.closed {
                return (None, Some(Err(BrokerError::Closed)));
            }
            let Some(events) = state.events.clone() else {
                return (None, Some(Err(BrokerError::NotConnected)));
            };
            let offline: Vec<InboundMessage> = state.offline.drain(..).collect();
            (Some((events, offline)), Self::subscribe_outcome(state, filter, qos))
        });

        // Blocks on a full event channel like a real transport driver
        if let Some((events, offline)) = flush {
            for message in offline {
                if events.send(TransportEvent::Message(message)).await.is_err() {
                    break;
                }
            }
        }

        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError> {
        self.with_state(|state| {
            state.operations.push(BrokerOp::Publish {
                topic: topic.to_string(),
                payload,
                qos,
            });
            if state.closed {
                return Err(BrokerError::Closed);
            }
            if state.events.is_none() {
                return Err(BrokerError::NotConnected);
            }
            if state.reject_publishes {
                return Err(BrokerError::Rejected(format!("PUBACK NotAuthorized on {topic}")));
            }
            Ok(())
        })
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let stall = self.with_state(|state| {
            state.operations.push(BrokerOp::Disconnect);
            state.events = None;
            state.stall_disconnect
        });
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.with_state(|state| {
            state.operations.push(BrokerOp::Close);
            state.events = None;
            state.closed = true;
        });
        Ok(())
    }
}

/// One recorded sink callback
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Message(InboundMessage),
    Connected,
    Disconnected(String),
    Reconnecting(u32),
    DeliveryFailed(Diagnostic),
}

/// Sink that records every callback
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    changed: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Wait until `predicate` holds for the recorded events
    pub async fn wait_until(
        &self,
        within: Duration,
        predicate: impl Fn(&[SinkEvent]) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if predicate(&self.events()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.events());
            }
        }
    }

    /// Wait until at least `count` messages were delivered
    pub async fn wait_for_messages(&self, count: usize, within: Duration) -> bool {
        self.wait_until(within, |events| {
            events
                .iter()
                .filter(|event| matches!(event, SinkEvent::Message(_)))
                .count()
                >= count
        })
        .await
    }
}

#[async_trait]
impl MessageCallbackSink for RecordingSink {
    async fn on_message(&self, message: InboundMessage) {
        self.record(SinkEvent::Message(message));
    }

    fn on_connected(&self) {
        self.record(SinkEvent::Connected);
    }

    fn on_disconnected(&self, reason: &str) {
        self.record(SinkEvent::Disconnected(reason.to_string()));
    }

    fn on_reconnecting(&self, attempt: u32) {
        self.record(SinkEvent::Reconnecting(attempt));
    }

    fn on_delivery_failed(&self, diagnostic: &Diagnostic) {
        self.record(SinkEvent::DeliveryFailed(diagnostic.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_records_operations() {
        let broker = MockBroker::new();
        let mut events = broker.connect(true).await.unwrap();
        broker.subscribe("a/b", QoS::AtLeastOnce).await.unwrap();
        assert!(broker.deliver("a/b", "hello", QoS::AtLeastOnce));

        match events.recv().await {
            Some(TransportEvent::Message(message)) => assert_eq!(message.topic, "a/b"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(broker.drop_connection("reset"));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::ConnectionLost("reset".to_string()))
        );
        assert_eq!(events.recv().await, None);
        assert_eq!(broker.subscriptions(), vec!["a/b".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_broker_scripted_failures() {
        let broker = MockBroker::new();
        broker.fail_next_connects(1);
        assert!(matches!(
            broker.connect(true).await,
            Err(BrokerError::Transport(_))
        ));

        let _events = broker.connect(false).await.unwrap();
        broker.reject_filter("bad/#");
        broker.grant_qos("low/qos", QoS::AtMostOnce);
        assert!(matches!(
            broker.subscribe("bad/#", QoS::AtMostOnce).await,
            Err(BrokerError::InvalidTopicFilter(_))
        ));
        assert!(matches!(
            broker.subscribe("low/qos", QoS::ExactlyOnce).await,
            Err(BrokerError::QosNotGranted { .. })
        ));
        assert_eq!(broker.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_recording_sink_wait() {
        let sink = Arc::new(RecordingSink::new());
        let writer = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer
                .on_message(InboundMessage::new("a/b", "x", QoS::AtMostOnce, false))
                .await;
        });

        assert!(sink.wait_for_messages(1, Duration::from_secs(2)).await);
        assert!(!sink.wait_for_messages(2, Duration::from_millis(20)).await);
    }
}
