//! Guaranteed release of a connection manager
//!
//! [`run_scoped`] runs the caller's body and then shuts the manager down on
//! every exit path: normal return, error, or panic inside the body.

use super::lifecycle::BrokerConnectionManager;
use crate::transport::BrokerClient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Run `body` with the manager, then `shutdown(grace)` it no matter what.
///
/// The body runs on its own task so a panic is caught, the manager is
/// released, and the panic is resumed afterwards.
pub async fn run_scoped<B, F, Fut, T, E>(
    manager: Arc<BrokerConnectionManager<B>>,
    grace: Duration,
    body: F,
) -> Result<T, E>
where
    B: BrokerClient,
    F: FnOnce(Arc<BrokerConnectionManager<B>>) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let outcome = tokio::spawn(body(manager.clone())).await;

    if let Err(e) = manager.shutdown(grace).await {
        error!("Failed to release broker connection: {}", e);
    }

    match outcome {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            std::panic::resume_unwind(join_error.into_panic())
        }
        Err(join_error) => {
            // Only reachable if the runtime is shutting down
            error!("Scoped body was cancelled: {}", join_error);
            std::panic::resume_unwind(Box::new(join_error.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::manager::ConnectionState;
    use crate::message::QoS;
    use crate::testing::{MockBroker, RecordingSink};
    use crate::topics::TopicInterest;

    fn manager(broker: &MockBroker) -> Arc<BrokerConnectionManager<MockBroker>> {
        let config =
            ConnectionConfig::new("mqtt://localhost:1883", "scoped-test", QoS::AtLeastOnce)
                .unwrap();
        let topics = TopicInterest::from_filters(["a/b"]).unwrap();
        Arc::new(BrokerConnectionManager::new(
            broker.clone(),
            config,
            topics,
            Arc::new(RecordingSink::new()),
        ))
    }

    #[tokio::test]
    async fn test_releases_on_success() {
        let broker = MockBroker::new();
        let manager = manager(&broker);

        let value = run_scoped(manager.clone(), Duration::from_secs(1), |m| async move {
            m.connect(true, true).await.map_err(|e| e.to_string())?;
            Ok::<_, String>(7)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_releases_on_error() {
        let broker = MockBroker::new();
        let manager = manager(&broker);

        let result: Result<(), String> =
            run_scoped(manager.clone(), Duration::from_secs(1), |m| async move {
                m.connect(true, true).await.map_err(|e| e.to_string())?;
                Err("business failure".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "business failure");
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_releases_on_panic() {
        let broker = MockBroker::new();
        let manager = manager(&broker);

        let scoped = tokio::spawn({
            let manager = manager.clone();
            async move {
                run_scoped(manager, Duration::from_secs(1), |m| async move {
                    m.connect(true, true).await.map_err(|e| e.to_string())?;
                    if m.is_connected() {
                        panic!("handler bug");
                    }
                    Ok::<(), String>(())
                })
                .await
            }
        });

        assert!(scoped.await.unwrap_err().is_panic());
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
