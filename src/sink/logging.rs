//! Sink that records every message verbatim
//!
//! Used by the log-sink service: each delivery is logged through `tracing`
//! and, when an audit writer is attached, appended as one JSON line.

use super::MessageCallbackSink;
use crate::message::InboundMessage;
use crate::observability::Diagnostic;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// One audit line
#[derive(Debug, Serialize)]
pub struct AuditRecord<'a> {
    pub topic: &'a str,
    pub payload: String,
    pub qos: u8,
    pub retained: bool,
    pub received_at: DateTime<Utc>,
}

impl<'a> From<&'a InboundMessage> for AuditRecord<'a> {
    fn from(message: &'a InboundMessage) -> Self {
        Self {
            topic: &message.topic,
            payload: message.payload_lossy(),
            qos: message.qos.into(),
            retained: message.retained,
            received_at: message.received_at,
        }
    }
}

#[derive(Default)]
pub struct LoggingSink {
    audit: Option<Mutex<Box<dyn Write + Send>>>,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every message as a JSON line to `writer`
    pub fn with_audit_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            audit: Some(Mutex::new(Box::new(writer))),
        }
    }

    fn append_audit(&self, message: &InboundMessage) {
        let Some(audit) = &self.audit else {
            return;
        };

        let line = match serde_json::to_string(&AuditRecord::from(message)) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize audit record for {}: {}", message.topic, e);
                return;
            }
        };

        let mut writer = audit.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            warn!("Failed to write audit record for {}: {}", message.topic, e);
        }
    }
}

#[async_trait]
impl MessageCallbackSink for LoggingSink {
    async fn on_message(&self, message: InboundMessage) {
        info!(
            topic = %message.topic,
            qos = %message.qos,
            retained = message.retained,
            bytes = message.payload.len(),
            "{}",
            message.payload_lossy()
        );
        self.append_audit(&message);
    }

    fn on_connected(&self) {
        info!("Log sink connected, observing configured topics");
    }

    fn on_disconnected(&self, reason: &str) {
        warn!("Log sink disconnected: {}", reason);
    }

    fn on_reconnecting(&self, attempt: u32) {
        info!("Log sink reconnecting, attempt {}", attempt);
    }

    fn on_delivery_failed(&self, diagnostic: &Diagnostic) {
        // The log sink never publishes; record and move on
        warn!("Delivery failed: {}", diagnostic);
    }
}
