//! Impure I/O for the `rumqttc` v5 broker client
//!
//! Each session owns an `AsyncClient` plus a driver task polling its
//! `EventLoop`. The driver completes the [`PendingSlot`] on acknowledgments and
//! forwards inbound publishes and unsolicited loss to the session's event
//! channel. The driver never reconnects by itself; that is the connection
//! manager's job.

use super::connection::{configure_mqtt_options, to_wire_qos, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ConnectionConfig;
use crate::error::BrokerError;
use crate::message::QoS;
use crate::transport::pending::{Acknowledgment, OperationKind, PendingSlot};
use crate::transport::{BrokerClient, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

/// `rumqttc`-backed implementation of [`BrokerClient`]
pub struct MqttBrokerClient {
    config: ConnectionConfig,
    session: Mutex<Option<Session>>,
    pending: Arc<PendingSlot>,
    closed: AtomicBool,
}

impl MqttBrokerClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            pending: Arc::new(PendingSlot::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    async fn await_completion(
        rx: oneshot::Receiver<Result<Acknowledgment, BrokerError>>,
    ) -> Result<Acknowledgment, BrokerError> {
        rx.await
            .map_err(|_| BrokerError::ConnectionLost("session driver stopped".to_string()))?
    }

    /// Poll the event loop until the session ends
    async fn drive(
        client_id: String,
        mut event_loop: EventLoop,
        pending: Arc<PendingSlot>,
        events: mpsc::Sender<TransportEvent>,
        closing: Arc<AtomicBool>,
    ) {
        debug!(target: "mqtt_transport", client_id = %client_id, "Session driver started");
        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(error) => {
                    Self::handle_poll_error(error, &pending, &events, &closing).await;
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    pending.complete(OperationKind::Connect, Ok(Acknowledgment::SessionOpened));
                }
                EventRoute::MessageReceived(message) => {
                    debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", message.topic);
                    if events.send(TransportEvent::Message(message)).await.is_err() {
                        debug!(target: "mqtt_transport", "Event receiver dropped, stopping driver");
                        break;
                    }
                }
                EventRoute::SubscribeSent { packet_id } => {
                    pending.bind_packet(OperationKind::Subscribe, packet_id);
                }
                EventRoute::SubscriptionAcknowledged { packet_id, result } => {
                    let result = result.map(|granted| Acknowledgment::Subscribed { granted });
                    if !pending.complete_packet(OperationKind::Subscribe, packet_id, result) {
                        debug!(target: "mqtt_transport", packet_id, "Ignoring uncorrelated SUBACK");
                    }
                }
                EventRoute::PublishSent { packet_id } => {
                    pending.bind_packet(OperationKind::Publish, packet_id);
                }
                EventRoute::PublishAcknowledged { packet_id, result } => {
                    let result = result.map(|()| Acknowledgment::Delivered);
                    if !pending.complete_packet(OperationKind::Publish, packet_id, result) {
                        debug!(target: "mqtt_transport", packet_id, "Ignoring uncorrelated publish ack");
                    }
                }
                EventRoute::DisconnectSent => {
                    pending.complete(OperationKind::Disconnect, Ok(Acknowledgment::SessionClosed));
                    break;
                }
                EventRoute::Disconnected(reason) => {
                    warn!(target: "mqtt_transport", "{}", reason);
                    pending.fail(BrokerError::ConnectionLost(reason.clone()));
                    if !closing.load(Ordering::SeqCst) {
                        let _ = events.send(TransportEvent::ConnectionLost(reason)).await;
                    }
                    break;
                }
                EventRoute::InfrastructureEvent(description) => {
                    tracing::trace!(target: "mqtt_transport", "MQTT event: {}", description);
                }
                EventRoute::OutgoingEvent => {}
            }
        }
        debug!(target: "mqtt_transport", client_id = %client_id, "Session driver stopped");
    }

    async fn handle_poll_error(
        error: rumqttc::v5::ConnectionError,
        pending: &PendingSlot,
        events: &mpsc::Sender<TransportEvent>,
        closing: &AtomicBool,
    ) {
        if closing.load(Ordering::SeqCst) {
            pending.complete(OperationKind::Disconnect, Ok(Acknowledgment::SessionClosed));
            return;
        }

        let error = MessageHandler::classify_connection_error(error);
        if pending.pending_kind() == Some(OperationKind::Connect) {
            // Session never opened: the connect caller gets the error
            pending.fail(error);
            return;
        }

        let reason = error.to_string();
        warn!(target: "mqtt_transport", "MQTT event loop error: {}", reason);
        pending.fail(BrokerError::ConnectionLost(reason.clone()));
        let _ = events.send(TransportEvent::ConnectionLost(reason)).await;
    }

    async fn teardown(session: Session) {
        session.closing.store(true, Ordering::SeqCst);
        session.driver.abort();
    }

    async fn live_client(&self) -> Result<AsyncClient, BrokerError> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .filter(|s| !s.driver.is_finished())
            .map(|s| s.client.clone())
            .ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(
        &self,
        clean_start: bool,
    ) -> Result<mpsc::Receiver<TransportEvent>, BrokerError> {
        self.ensure_open()?;

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            Self::teardown(previous).await;
        }

        let options = configure_mqtt_options(&self.config, clean_start);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));

        let completion = self.pending.register(OperationKind::Connect);
        let driver = tokio::spawn(Self::drive(
            self.config.client_id().to_string(),
            event_loop,
            self.pending.clone(),
            events_tx,
            closing.clone(),
        ));

        // Stored before waiting so a caller that gives up can still disconnect it
        *session = Some(Session {
            client,
            driver,
            closing,
        });

        match Self::await_completion(completion).await {
            Ok(_) => {
                info!(
                    broker = %self.config.broker_url(),
                    client_id = %self.config.client_id(),
                    clean_start,
                    "MQTT session opened"
                );
                Ok(events_rx)
            }
            Err(error) => {
                if let Some(failed) = session.take() {
                    failed.driver.abort();
                }
                Err(error)
            }
        }
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let client = self.live_client().await?;

        let completion = self.pending.register(OperationKind::Subscribe);
        client
            .subscribe(filter, to_wire_qos(qos))
            .await
            .map_err(BrokerError::transport)?;

        match Self::await_completion(completion).await? {
            Acknowledgment::Subscribed { granted } => MessageHandler::validate_grant(qos, granted),
            other => Err(BrokerError::Rejected(format!(
                "unexpected acknowledgment {other:?} for SUBSCRIBE"
            ))),
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let client = self.live_client().await?;

        if !qos.requires_ack() {
            return client
                .publish(topic, to_wire_qos(qos), false, payload)
                .await
                .map_err(BrokerError::transport);
        }

        let completion = self.pending.register(OperationKind::Publish);
        client
            .publish(topic, to_wire_qos(qos), false, payload)
            .await
            .map_err(BrokerError::transport)?;
        Self::await_completion(completion).await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut session = self.session.lock().await;
        let Some(current) = session.take() else {
            return Ok(());
        };

        if current.driver.is_finished() {
            return Ok(());
        }

        current.closing.store(true, Ordering::SeqCst);
        let completion = self.pending.register(OperationKind::Disconnect);
        if let Err(error) = current.client.disconnect().await {
            // Request channel already closed: the event loop is gone
            debug!(target: "mqtt_transport", "DISCONNECT not queued: {}", error);
            self.pending.complete(OperationKind::Disconnect, Ok(Acknowledgment::SessionClosed));
        }

        let result = Self::await_completion(completion).await.map(|_| ());
        current.driver.abort();
        info!(client_id = %self.config.client_id(), "MQTT session closed");
        result
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.lock().await.take() {
            Self::teardown(session).await;
        }
        self.pending.fail(BrokerError::Closed);
        Ok(())
    }
}

impl Drop for MqttBrokerClient {
    fn drop(&mut self) {
        // Can't await here; just stop the driver task if it's still running
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(session) = session.take() {
                session.driver.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_client() -> MqttBrokerClient {
        let config = ConnectionConfig::new("mqtt://127.0.0.1:1", "client-test", QoS::AtLeastOnce)
            .unwrap();
        MqttBrokerClient::new(config)
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let client = test_client();
        assert!(matches!(
            client.subscribe("a/b", QoS::AtLeastOnce).await,
            Err(BrokerError::NotConnected)
        ));
        assert!(matches!(
            client.publish("a/b", Bytes::from("x"), QoS::AtMostOnce).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let client = test_client();
        assert!(client.disconnect().await.is_ok());
        assert!(client.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let client = test_client();
        let result = tokio::time::timeout(Duration::from_secs(5), client.connect(true)).await;
        match result {
            Ok(Err(BrokerError::Transport(_))) => {}
            Ok(other) => panic!("expected transport failure, got {other:?}"),
            Err(_) => panic!("connect to a closed port should fail fast"),
        }
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let client = test_client();
        client.close().await.unwrap();
        assert!(matches!(client.connect(true).await, Err(BrokerError::Closed)));
        assert!(matches!(
            client.subscribe("a/b", QoS::AtMostOnce).await,
            Err(BrokerError::Closed)
        ));
    }
}
