//! The single in-flight operation awaiting broker acknowledgment
//!
//! The event loop only reports packet identifiers, so correlation works by
//! keeping at most one operation outstanding: the slot is filled before the
//! request is queued, bound to a packet id when the outgoing packet is
//! written, and completed by the matching acknowledgment. Acknowledgments for
//! anything else (for example a request that already timed out) are ignored.

use crate::error::BrokerError;
use crate::message::QoS;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Connect,
    Subscribe,
    Publish,
    Disconnect,
}

/// Successful completion of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    SessionOpened,
    Subscribed { granted: QoS },
    Delivered,
    SessionClosed,
}

pub type Completion = Result<Acknowledgment, BrokerError>;

#[derive(Debug)]
pub struct PendingOperation {
    kind: OperationKind,
    packet_id: Option<u16>,
    completion: oneshot::Sender<Completion>,
}

/// Holder for the one outstanding operation of a client
#[derive(Debug, Default)]
pub struct PendingSlot {
    slot: Mutex<Option<PendingOperation>>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Option<PendingOperation>) -> R) -> R {
        let mut guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Register a new operation, dropping any stale one.
    ///
    /// Returns the receiver that resolves when the operation completes.
    pub fn register(&self, kind: OperationKind) -> oneshot::Receiver<Completion> {
        let (completion, rx) = oneshot::channel();
        self.with_slot(|slot| {
            if let Some(stale) = slot.replace(PendingOperation {
                kind,
                packet_id: None,
                completion,
            }) {
                debug!(target: "mqtt_transport", "Dropping stale pending {:?}", stale.kind);
            }
        });
        rx
    }

    /// Bind the outgoing packet id to the pending operation of this kind
    pub fn bind_packet(&self, kind: OperationKind, packet_id: u16) -> bool {
        self.with_slot(|slot| match slot {
            Some(pending) if pending.kind == kind && pending.packet_id.is_none() => {
                pending.packet_id = Some(packet_id);
                true
            }
            _ => false,
        })
    }

    /// Complete the pending operation if it is of `kind`
    pub fn complete(&self, kind: OperationKind, result: Completion) -> bool {
        self.complete_if(|pending| pending.kind == kind, result)
    }

    /// Complete the pending operation if it is of `kind` and bound to `packet_id`
    pub fn complete_packet(&self, kind: OperationKind, packet_id: u16, result: Completion) -> bool {
        self.complete_if(
            |pending| pending.kind == kind && pending.packet_id == Some(packet_id),
            result,
        )
    }

    /// Fail whatever is pending
    pub fn fail(&self, error: BrokerError) -> Option<OperationKind> {
        let pending = self.with_slot(Option::take)?;
        let kind = pending.kind;
        let _ = pending.completion.send(Err(error));
        Some(kind)
    }

    pub fn pending_kind(&self) -> Option<OperationKind> {
        self.with_slot(|slot| slot.as_ref().map(|p| p.kind))
    }

    fn complete_if(&self, matches: impl FnOnce(&PendingOperation) -> bool, result: Completion) -> bool {
        let pending = self.with_slot(|slot| {
            if slot.as_ref().is_some_and(matches) {
                slot.take()
            } else {
                None
            }
        });
        match pending {
            Some(pending) => {
                // Receiver may be gone if the caller already timed out
                let _ = pending.completion.send(result);
                true
            }
            None => false,
        }
    }
}
