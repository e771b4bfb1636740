//! Broker connection manager
//!
//! Owns one broker session and its subscription set. Every public operation
//! takes the operation lock for the whole "issue, then await acknowledgment"
//! sequence, so at most one request is outstanding against the broker client
//! at a time and subscriptions are acknowledged strictly in order.
//!
//! After a successful `connect` a supervisor task owns the session's event
//! stream: it hands inbound messages to the sink and, on unsolicited loss,
//! either settles at `Disconnected` or reconnects with backoff and replays
//! the full topic interest set before reporting `Connected` again.

use super::health_monitor::{
    ConnectionEvent, ConnectionState, HealthMonitor, ReconnectionDecision,
};
use crate::config::ConnectionConfig;
use crate::error::{
    BrokerError, CloseError, ClosedError, ConnectError, DisconnectError, PublishError,
    SubscribeError,
};
use crate::message::QoS;
use crate::{lifecycle_span, mqtt_span};
use crate::observability;
use crate::sink::MessageCallbackSink;
use crate::topics::{validate_topic_filter, validate_topic_name, TopicInterest};
use crate::transport::{BrokerClient, TransportEvent};
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// How long `disconnect`/`connect` wait for the supervisor to notice shutdown
const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct SessionOptions {
    clean_start: bool,
    automatic_reconnect: bool,
}

/// An open session: its event stream plus whatever arrived while the topic
/// interest set was being restored
struct SessionStream {
    events: mpsc::Receiver<TransportEvent>,
    backlog: VecDeque<TransportEvent>,
}

struct Supervisor {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct Inner<B> {
    client: B,
    config: ConnectionConfig,
    topics: TopicInterest,
    sink: Arc<dyn MessageCallbackSink>,
    op_lock: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    subscribed: StdMutex<Vec<String>>,
    reconnect_count: AtomicU32,
}

/// Lifecycle owner of one broker session
pub struct BrokerConnectionManager<B: BrokerClient> {
    inner: Arc<Inner<B>>,
    supervisor: StdMutex<Option<Supervisor>>,
}

impl<B: BrokerClient> BrokerConnectionManager<B> {
    /// Build a manager around an already constructed sink.
    ///
    /// Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        client: B,
        config: ConnectionConfig,
        topics: TopicInterest,
        sink: Arc<dyn MessageCallbackSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                topics,
                sink,
                op_lock: Mutex::new(()),
                state_tx,
                subscribed: StdMutex::new(Vec::new()),
                reconnect_count: AtomicU32::new(0),
            }),
            supervisor: StdMutex::new(None),
        }
    }

    /// Open the session and subscribe every configured topic, in order.
    ///
    /// Accepted from `Disconnected`, and from `Reconnecting`, where it
    /// supersedes the running reconnect loop. A failure leaves the manager
    /// `Disconnected`; `connect` itself never retries.
    pub async fn connect(
        &self,
        clean_start: bool,
        automatic_reconnect: bool,
    ) -> Result<(), ConnectError> {
        let span = mqtt_span!(
            operation = "connect",
            client_id = %self.client_id(),
            clean_start,
            automatic_reconnect
        );
        let options = SessionOptions {
            clean_start,
            automatic_reconnect,
        };
        let result = self.connect_inner(options).instrument(span).await;
        if let Err(error) = &result {
            observability::report(error);
        }
        result
    }

    /// [`connect`](Self::connect) with the configured session flags
    pub async fn connect_default(&self) -> Result<(), ConnectError> {
        self.connect(
            self.inner.config.clean_start(),
            self.inner.config.automatic_reconnect(),
        )
        .await
    }

    async fn connect_inner(&self, options: SessionOptions) -> Result<(), ConnectError> {
        self.inner.ensure_open()?;
        if self.state() == ConnectionState::Reconnecting {
            info!("connect() supersedes the running reconnection loop");
            self.stop_supervisor().await;
        }

        let _guard = self.inner.op_lock.lock().await;
        let state = self.inner.state();
        if state == ConnectionState::Closed {
            return Err(ClosedError.into());
        }
        if !HealthMonitor::can_connect(state) {
            return Err(ConnectError::InvalidState { state });
        }

        self.inner.transition(ConnectionEvent::ConnectRequested);
        match self.inner.open_session(options.clean_start).await {
            Ok(session) => {
                self.inner.transition(ConnectionEvent::SubscriptionsRestored);
                self.inner.sink.on_connected();
                self.spawn_supervisor(session, options);
                Ok(())
            }
            Err(error) => {
                self.inner
                    .transition(ConnectionEvent::ConnectFailed(error.to_string()));
                Err(error)
            }
        }
    }

    /// Subscribe one additional filter.
    ///
    /// Valid while `Connected`, `Connecting` or `Reconnecting`. Ad-hoc
    /// subscriptions are not part of the topic interest set and are therefore
    /// not replayed after a reconnect.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SubscribeError> {
        let span = mqtt_span!(operation = "subscribe", topic = %topic, qos = %qos);
        let result = async {
            self.inner.ensure_open()?;
            validate_topic_filter(topic)?;

            let Some(_guard) = self.inner.lock_operation().await else {
                return Err(SubscribeError::Timeout {
                    topic: topic.to_string(),
                    after: self.inner.config.operation_timeout(),
                });
            };
            let state = self.inner.state();
            if state == ConnectionState::Closed {
                return Err(ClosedError.into());
            }
            if !HealthMonitor::can_subscribe(state) {
                return Err(SubscribeError::NotConnected { state });
            }
            self.inner.subscribe_locked(topic, qos).await
        }
        .instrument(span)
        .await;

        if let Err(error) = &result {
            observability::report(error);
        }
        result
    }

    /// [`subscribe`](Self::subscribe) at the configured default QoS
    pub async fn subscribe_default(&self, topic: &str) -> Result<(), SubscribeError> {
        self.subscribe(topic, self.inner.config.default_qos()).await
    }

    /// Publish one payload.
    ///
    /// Fails with [`PublishError::NotConnected`] without touching the
    /// transport unless the state is `Connected`. QoS 0 resolves once the
    /// payload is handed over, QoS 1/2 once the broker acknowledged it.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> Result<(), PublishError> {
        let payload = payload.into();
        let span = mqtt_span!(
            operation = "publish",
            topic = %topic,
            qos = %qos,
            bytes = payload.len()
        );
        let result = self.publish_inner(topic, payload, qos).instrument(span).await;

        if let Err(error) = &result {
            let diagnostic = observability::report(error);
            if matches!(
                error,
                PublishError::Rejected { .. } | PublishError::Timeout { .. }
            ) {
                self.inner.sink.on_delivery_failed(&diagnostic);
            }
        }
        result
    }

    /// [`publish`](Self::publish) at the configured default QoS
    pub async fn publish_default(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), PublishError> {
        self.publish(topic, payload, self.inner.config.default_qos())
            .await
    }

    async fn publish_inner(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<(), PublishError> {
        self.inner.ensure_open()?;
        let state = self.inner.state();
        if !HealthMonitor::can_publish(state) {
            return Err(PublishError::NotConnected { state });
        }
        validate_topic_name(topic)?;

        let timeout = self.inner.config.operation_timeout();
        let Some(_guard) = self.inner.lock_operation().await else {
            return Err(PublishError::Timeout {
                topic: topic.to_string(),
                after: timeout,
            });
        };
        let state = self.inner.state();
        if !HealthMonitor::can_publish(state) {
            return Err(PublishError::NotConnected { state });
        }

        match tokio::time::timeout(timeout, self.inner.client.publish(topic, payload, qos)).await
        {
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                after: timeout,
            }),
            Ok(Err(BrokerError::Closed)) => Err(ClosedError.into()),
            Ok(Err(source)) => Err(PublishError::Rejected {
                topic: topic.to_string(),
                source,
            }),
            Ok(Ok(())) => {
                debug!(target: "mqtt_transport", "Published to {} at QoS {}", topic, qos);
                Ok(())
            }
        }
    }

    /// Gracefully close the session and stop any reconnect loop.
    ///
    /// A no-op when already `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let span = mqtt_span!(operation = "disconnect", client_id = %self.client_id());
        let result = async {
            self.inner.ensure_open()?;
            self.stop_supervisor().await;
            let _guard = self.inner.op_lock.lock().await;
            self.inner.disconnect_locked().await
        }
        .instrument(span)
        .await;

        if let Err(error) = &result {
            observability::report(error);
        }
        result
    }

    /// Release the transport. Only valid once `Disconnected`; terminal.
    pub async fn close(&self) -> Result<(), CloseError> {
        let span = mqtt_span!(operation = "close", client_id = %self.client_id());
        let result = async {
            self.inner.ensure_open()?;
            self.stop_supervisor().await;
            let _guard = self.inner.op_lock.lock().await;
            self.inner.close_locked().await
        }
        .instrument(span)
        .await;

        if let Err(error) = &result {
            observability::report(error);
        }
        result
    }

    /// Bounded graceful shutdown: `disconnect()` then `close()`.
    ///
    /// An in-flight operation gets up to `grace` to finish; after that the
    /// manager is forced to `Closed` regardless. Calling it on a closed
    /// manager is a no-op.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), CloseError> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        info!(client_id = %self.client_id(), "Shutting down broker connection");
        self.stop_supervisor().await;

        let guard = tokio::time::timeout(grace, self.inner.op_lock.lock())
            .await
            .ok();
        if guard.is_none() {
            warn!(
                "In-flight broker operation still running after {:?}, forcing shutdown",
                grace
            );
        }

        if let Err(error) = self.inner.disconnect_locked().await {
            observability::report(&error);
        }
        let result = self.inner.close_locked().await;
        if let Err(error) = &result {
            observability::report(error);
        }
        drop(guard);
        result
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the state equals `target`, giving up after `within`
    pub async fn wait_for_state(&self, target: ConnectionState, within: Duration) -> bool {
        let mut state_rx = self.subscribe_state();
        tokio::time::timeout(within, state_rx.wait_for(|state| *state == target))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    /// Filters acknowledged since the last (re)connect, in issue order
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.subscriptions()
    }

    pub fn topics(&self) -> &TopicInterest {
        &self.inner.topics
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn client_id(&self) -> &str {
        self.inner.config.client_id()
    }

    /// Successful automatic reconnections since construction
    pub fn reconnect_count(&self) -> u32 {
        self.inner.reconnect_count.load(Ordering::SeqCst)
    }

    fn spawn_supervisor(&self, session: SessionStream, options: SessionOptions) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = lifecycle_span!(
            client_id = %self.client_id(),
            automatic_reconnect = options.automatic_reconnect
        );
        let handle = tokio::spawn(
            supervise(self.inner.clone(), session, options, shutdown_rx).instrument(span),
        );

        let previous = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Supervisor {
                handle,
                shutdown_tx,
            });
        if let Some(previous) = previous {
            let _ = previous.shutdown_tx.send(true);
            previous.handle.abort();
        }
    }

    async fn stop_supervisor(&self) {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Supervisor {
            mut handle,
            shutdown_tx,
        }) = supervisor
        else {
            return;
        };

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(SUPERVISOR_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("Session supervisor stopped"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Session supervisor ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Session supervisor didn't stop gracefully, forcing abort");
                handle.abort();
            }
        }
    }
}

impl<B: BrokerClient> Drop for BrokerConnectionManager<B> {
    fn drop(&mut self) {
        // Can't disconnect here; at least stop the supervisor task
        let supervisor = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.shutdown_tx.send(true);
            supervisor.handle.abort();
        }
    }
}

impl<B: BrokerClient> Inner<B> {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn ensure_open(&self) -> Result<(), ClosedError> {
        if self.state() == ConnectionState::Closed {
            Err(ClosedError)
        } else {
            Ok(())
        }
    }

    /// Apply an event to the state machine and notify observers on change
    fn transition(&self, event: ConnectionEvent) -> ConnectionState {
        let mut from = ConnectionState::Disconnected;
        let mut to = ConnectionState::Disconnected;
        self.state_tx.send_if_modified(|state| {
            from = *state;
            to = HealthMonitor::determine_next_state(from, &event);
            *state = to;
            from != to
        });
        HealthMonitor::log_state_transition(from, to, &event);
        to
    }

    /// Wait for the operation lock, at most one operation timeout
    async fn lock_operation(&self) -> Option<MutexGuard<'_, ()>> {
        tokio::time::timeout(self.config.operation_timeout(), self.op_lock.lock())
            .await
            .ok()
    }

    fn subscriptions(&self) -> Vec<String> {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_subscription(&self, filter: &str) {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter.to_string());
    }

    fn clear_subscriptions(&self) {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Subscribe one filter; caller holds the operation lock
    async fn subscribe_locked(&self, filter: &str, qos: QoS) -> Result<(), SubscribeError> {
        let timeout = self.config.operation_timeout();
        match tokio::time::timeout(timeout, self.client.subscribe(filter, qos)).await {
            Err(_) => Err(SubscribeError::Timeout {
                topic: filter.to_string(),
                after: timeout,
            }),
            Ok(Err(error)) => Err(SubscribeError::from_broker(filter, error)),
            Ok(Ok(())) => {
                debug!(target: "mqtt_transport", "Subscribed to {} at QoS {}", filter, qos);
                self.record_subscription(filter);
                Ok(())
            }
        }
    }

    /// Open a transport session and replay the whole topic interest set.
    ///
    /// Traffic arriving before the last acknowledgment (queued offline
    /// messages, retained messages) is drained into the session backlog while
    /// the subscribes are in flight. Any failure abandons the half-open
    /// session.
    async fn open_session(&self, clean_start: bool) -> Result<SessionStream, ConnectError> {
        self.clear_subscriptions();

        let timeout = self.config.operation_timeout();
        let mut events =
            match tokio::time::timeout(timeout, self.client.connect(clean_start)).await {
                Err(_) => {
                    self.abandon_session().await;
                    return Err(ConnectError::Timeout(timeout));
                }
                Ok(result) => result?,
            };

        let mut backlog = VecDeque::new();
        for subscription in self.topics.iter() {
            let qos = subscription.effective_qos(self.config.default_qos());
            let subscribed = buffer_while(
                &mut events,
                &mut backlog,
                self.subscribe_locked(&subscription.filter, qos),
            )
            .await;
            if let Err(source) = subscribed {
                self.abandon_session().await;
                self.clear_subscriptions();
                return Err(ConnectError::Restoration {
                    topic: subscription.filter.clone(),
                    source,
                });
            }
        }

        if !backlog.is_empty() {
            debug!(
                "{} event(s) arrived during subscription restoration",
                backlog.len()
            );
        }
        Ok(SessionStream { events, backlog })
    }

    async fn abandon_session(&self) {
        let timeout = self.config.operation_timeout();
        match tokio::time::timeout(timeout, self.client.disconnect()).await {
            Ok(Ok(())) => debug!("Abandoned half-open session"),
            Ok(Err(e)) => debug!("Failed to abandon half-open session: {}", e),
            Err(_) => debug!("Timed out abandoning half-open session"),
        }
    }

    /// Graceful close; caller holds the operation lock (or is forcing)
    async fn disconnect_locked(&self) -> Result<(), DisconnectError> {
        match self.state() {
            ConnectionState::Closed => Err(ClosedError.into()),
            ConnectionState::Disconnected => {
                debug!("Already disconnected, nothing to do");
                Ok(())
            }
            _ => {
                let timeout = self.config.operation_timeout();
                let result = match tokio::time::timeout(timeout, self.client.disconnect()).await {
                    Err(_) => Err(DisconnectError::Timeout(timeout)),
                    Ok(Err(error)) => Err(DisconnectError::Transport(error)),
                    Ok(Ok(())) => Ok(()),
                };
                self.clear_subscriptions();
                self.transition(ConnectionEvent::DisconnectRequested);
                self.sink.on_disconnected("disconnect requested");
                result
            }
        }
    }

    async fn close_locked(&self) -> Result<(), CloseError> {
        match self.state() {
            ConnectionState::Closed => Err(ClosedError.into()),
            ConnectionState::Disconnected => {
                let result = self.client.close().await.map_err(CloseError::Transport);
                self.transition(ConnectionEvent::Released);
                info!(client_id = %self.config.client_id(), "Broker connection closed");
                result
            }
            state => Err(CloseError::NotDisconnected { state }),
        }
    }

    /// Handle an unsolicited session loss.
    ///
    /// Returns the restored session, or `None` when the supervisor should
    /// stop. The operation lock is held only while the loss is recorded and
    /// during each reconnection attempt, never across a backoff delay.
    async fn recover(
        &self,
        reason: String,
        options: SessionOptions,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<SessionStream> {
        {
            let _guard = until_shutdown(shutdown_rx, self.op_lock.lock()).await?;
            observability::report(&BrokerError::ConnectionLost(reason.clone()));
            self.clear_subscriptions();
            self.transition(ConnectionEvent::ConnectionLost {
                reason: reason.clone(),
                automatic_reconnect: options.automatic_reconnect,
            });
        }

        if !options.automatic_reconnect {
            self.sink.on_disconnected(&reason);
            return None;
        }

        let reconnect = self.config.reconnect();
        let mut attempts = 0u32;
        loop {
            let decision =
                HealthMonitor::should_attempt_reconnection(attempts, reconnect, *shutdown_rx.borrow());

            match decision {
                ReconnectionDecision::Proceed { attempt, delay_ms } => {
                    attempts = attempt;
                    self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                    self.sink.on_reconnecting(attempt);

                    let max_display = reconnect
                        .max_attempts
                        .map_or("∞".to_string(), |max| max.to_string());
                    info!(
                        "Attempting reconnection {}/{} after {}ms delay",
                        attempt, max_display, delay_ms
                    );

                    if !interruptible_sleep(shutdown_rx, delay_ms).await {
                        return None;
                    }

                    let _guard = until_shutdown(shutdown_rx, self.op_lock.lock()).await?;
                    match until_shutdown(shutdown_rx, self.open_session(options.clean_start))
                        .await?
                    {
                        Ok(session) => {
                            self.reconnect_count.fetch_add(1, Ordering::SeqCst);
                            self.transition(ConnectionEvent::SubscriptionsRestored);
                            self.sink.on_connected();
                            return Some(session);
                        }
                        Err(error) => {
                            observability::report(&error);
                            self.transition(ConnectionEvent::ReconnectionFailed(error.to_string()));
                        }
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => {
                    info!("Shutdown signal received, stopping reconnection");
                    return None;
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    let reason = format!("Max reconnection attempts ({attempts}) exceeded");
                    self.transition(ConnectionEvent::PermanentFailure(reason.clone()));
                    self.sink.on_disconnected(&reason);
                    return None;
                }
            }
        }
    }
}

/// Delivery and reconnection loop for one connected manager
async fn supervise<B: BrokerClient>(
    inner: Arc<Inner<B>>,
    session: SessionStream,
    options: SessionOptions,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(client_id = %inner.config.client_id(), "Session supervisor started");
    let SessionStream {
        mut events,
        mut backlog,
    } = session;
    loop {
        let event = match backlog.pop_front() {
            Some(_) if *shutdown_rx.borrow() => break,
            Some(event) => Some(event),
            None => tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                event = events.recv() => event,
            },
        };

        let reason = match event {
            Some(TransportEvent::Message(message)) => {
                inner.sink.on_message(message).await;
                continue;
            }
            Some(TransportEvent::ConnectionLost(reason)) => reason,
            None => "session event stream closed".to_string(),
        };

        match inner.recover(reason, options, &mut shutdown_rx).await {
            Some(restored) => {
                events = restored.events;
                backlog = restored.backlog;
            }
            None => break,
        }
    }
    debug!(client_id = %inner.config.client_id(), "Session supervisor stopped");
}

/// Run `operation` while draining session traffic into `backlog`
async fn buffer_while<F: Future>(
    events: &mut mpsc::Receiver<TransportEvent>,
    backlog: &mut VecDeque<TransportEvent>,
    operation: F,
) -> F::Output {
    tokio::pin!(operation);
    let mut open = true;
    loop {
        tokio::select! {
            biased;
            output = &mut operation => return output,
            event = events.recv(), if open => match event {
                Some(event) => backlog.push_back(event),
                None => open = false,
            },
        }
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop
    let _ = shutdown_rx.wait_for(|stop| *stop).await.map(|_| ());
}

/// Run `future` unless shutdown is signalled first
async fn until_shutdown<F: Future>(
    shutdown_rx: &mut watch::Receiver<bool>,
    future: F,
) -> Option<F::Output> {
    if *shutdown_rx.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown_rx) => None,
        output = future => Some(output),
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    let completed = until_shutdown(shutdown_rx, tokio::time::sleep(Duration::from_millis(delay_ms)))
        .await
        .is_some();
    if !completed {
        info!("Shutdown signal received during reconnection delay, stopping");
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(&mut shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });
        assert!(!interruptible_sleep(&mut shutdown_rx, 10_000).await);
    }

    #[tokio::test]
    async fn test_until_shutdown_when_already_signalled() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        assert_eq!(until_shutdown(&mut shutdown_rx, async { 42 }).await, None);
    }

    #[tokio::test]
    async fn test_buffer_while_drains_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut backlog = VecDeque::new();

        let producer = async move {
            for i in 0..5 {
                let lost = TransportEvent::ConnectionLost(i.to_string());
                tx.send(lost).await.map_err(|_| "receiver gone")?;
            }
            Ok::<_, &str>(())
        };

        assert_eq!(buffer_while(&mut rx, &mut backlog, producer).await, Ok(()));
        assert_eq!(backlog.len(), 5);
        assert_eq!(
            backlog.front(),
            Some(&TransportEvent::ConnectionLost("0".to_string()))
        );
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);
        assert_eq!(
            until_shutdown(&mut shutdown_rx, std::future::pending::<()>()).await,
            None
        );
    }
}
