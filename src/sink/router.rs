//! Topic-routing sink for business services
//!
//! Handlers are registered against topic filters. Each delivery is matched in
//! registration order and the first matching handler runs on its own tokio
//! task; a semaphore bounds how many handlers run at once. The delivery task
//! only waits for a free permit, never for the handler itself.

use super::MessageCallbackSink;
use crate::message::InboundMessage;
use crate::topics::{topic_matches, validate_topic_filter, TopicError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default number of handlers allowed to run concurrently
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Domain-specific processing for messages on one topic filter
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

struct Route {
    filter: String,
    handler: Arc<dyn TopicHandler>,
}

pub struct TopicRouter {
    routes: Vec<Route>,
    permits: Arc<Semaphore>,
    workers: Mutex<JoinSet<()>>,
}

impl TopicRouter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            routes: Vec::new(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            workers: Mutex::new(JoinSet::new()),
        }
    }

    /// Register `handler` for every topic matching `filter`
    pub fn route(
        mut self,
        filter: impl Into<String>,
        handler: impl TopicHandler + 'static,
    ) -> Result<Self, TopicError> {
        let filter = filter.into();
        validate_topic_filter(&filter)?;
        self.routes.push(Route {
            filter,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    fn handler_for(&self, topic: &str) -> Option<(&str, Arc<dyn TopicHandler>)> {
        self.routes
            .iter()
            .find(|route| topic_matches(&route.filter, topic))
            .map(|route| (route.filter.as_str(), route.handler.clone()))
    }

    /// Number of handler tasks not yet reaped
    pub async fn in_flight(&self) -> usize {
        let mut workers = self.workers.lock().await;
        while workers.try_join_next().is_some() {}
        workers.len()
    }

    /// Wait up to `grace` for running handlers, then abort the rest.
    ///
    /// Returns the number of handlers that had to be aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                info!("All topic handlers finished");
                0
            }
            Err(_) => {
                let remaining = workers.len();
                warn!(
                    "{} topic handler(s) still running after {:?}, aborting",
                    remaining, grace
                );
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                remaining
            }
        }
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

#[async_trait]
impl MessageCallbackSink for TopicRouter {
    async fn on_message(&self, message: InboundMessage) {
        let Some((filter, handler)) = self.handler_for(&message.topic) else {
            debug!("No handler for topic {}, dropping message", message.topic);
            return;
        };

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Handler pool closed, dropping message on {}", message.topic);
                return;
            }
        };

        let filter = filter.to_string();
        let mut workers = self.workers.lock().await;
        while workers.try_join_next().is_some() {}
        workers.spawn(async move {
            let topic = message.topic.clone();
            if let Err(e) = handler.handle(message).await {
                error!(filter = %filter, "Handler failed for {}: {}", topic, e);
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl TopicHandler for Counting {
        async fn handle(
            &self,
            _message: InboundMessage,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl TopicHandler for Stuck {
        async fn handle(
            &self,
            _message: InboundMessage,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_matching_route_wins() {
        let bookings = Arc::new(AtomicUsize::new(0));
        let fallback = Arc::new(AtomicUsize::new(0));
        let router = TopicRouter::default()
            .route("clinic/patient/booking/+", Counting(bookings.clone()))
            .unwrap()
            .route("clinic/#", Counting(fallback.clone()))
            .unwrap();

        router
            .on_message(InboundMessage::new("clinic/patient/booking/create", "{}", QoS::AtLeastOnce, false))
            .await;
        router
            .on_message(InboundMessage::new("clinic/dentist/login", "{}", QoS::AtLeastOnce, false))
            .await;
        router
            .on_message(InboundMessage::new("other/topic", "{}", QoS::AtLeastOnce, false))
            .await;

        assert_eq!(router.drain(Duration::from_secs(1)).await, 0);
        assert_eq!(bookings.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_route_filter() {
        let result = TopicRouter::default().route("a/#/b", Counting(Arc::default()));
        assert!(matches!(result, Err(TopicError::MisplacedMultiLevelWildcard(_))));
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_handlers() {
        let router = TopicRouter::new(4).route("a/+", Stuck).unwrap();

        router
            .on_message(InboundMessage::new("a/b", "x", QoS::AtMostOnce, false))
            .await;
        assert_eq!(router.in_flight().await, 1);

        assert_eq!(router.drain(Duration::from_millis(20)).await, 1);
        assert_eq!(router.in_flight().await, 0);
    }
}
