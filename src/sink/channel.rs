//! Sink forwarding messages into a tokio channel
//!
//! The delivery task never waits on the receiver: when the channel is full the
//! message is dropped and counted.

use super::MessageCallbackSink;
use crate::message::InboundMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

pub struct ChannelSink {
    sender: mpsc::Sender<InboundMessage>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a sink and the receiver it feeds
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Messages dropped because the receiver was full or gone
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageCallbackSink for ChannelSink {
    async fn on_message(&self, message: InboundMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Channel sink full, dropping message on {}", message.topic);
            }
            Err(TrySendError::Closed(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Channel sink receiver gone, dropping message on {}", message.topic);
            }
        }
    }
}
