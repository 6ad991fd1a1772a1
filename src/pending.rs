//! Pending-call registry: maps an outbound correlation id to a one-shot
//! completion slot so the caller that issued a request can be resumed when
//! its matching response arrives, carrying local failures (timeout,
//! connection reset) alongside remote results/errors.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::envelope::RpcError;

/// The outcome delivered to a caller awaiting a pending request.
#[derive(Debug)]
pub enum Outcome {
    Result(Value),
    Remote(RpcError),
    ConnectionReset,
}

/// A one-shot completion slot keyed by outbound correlation id.
pub struct PendingSlot {
    tx: oneshot::Sender<Outcome>,
}

/// The registry mapping outbound id -> completion slot.
#[derive(Default)]
pub struct PendingRegistry {
    slots: HashMap<String, PendingSlot>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending slot for `id`, returning the receiver half the
    /// caller awaits.
    pub fn insert(&mut self, id: String) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id, PendingSlot { tx });
        rx
    }

    /// Remove and return the slot for `id`, if any.
    fn take(&mut self, id: &str) -> Option<PendingSlot> {
        self.slots.remove(id)
    }

    /// Complete the pending slot for a RESPONSE envelope's `id`.
    ///
    /// Returns `true` if a slot existed and was completed; `false` if the
    /// response was unsolicited.
    pub fn complete(&mut self, id: &str, outcome: std::result::Result<Value, RpcError>) -> bool {
        let Some(slot) = self.take(id) else {
            return false;
        };
        let outcome = match outcome {
            Ok(v) => Outcome::Result(v),
            Err(e) => Outcome::Remote(e),
        };
        // Ignore a send failure: the caller may have already timed out and
        // dropped its receiver.
        let _ = slot.tx.send(outcome);
        true
    }

    /// Remove a slot without completing it (used when `request_wait` times
    /// out and the slot should no longer be considered pending).
    pub fn cancel(&mut self, id: &str) {
        self.slots.remove(id);
    }

    /// Complete every outstanding slot with a connection-reset outcome, used
    /// when the owning peer closes.
    pub fn reset_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            let _ = slot.tx.send(Outcome::ConnectionReset);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_complete_delivers_result() {
        let mut reg = PendingRegistry::new();
        let rx = reg.insert("0A1".into());
        assert!(reg.contains("0A1"));

        assert!(reg.complete("0A1", Ok(serde_json::json!(["aaaa"]))));
        assert!(!reg.contains("0A1"));

        match rx.await.unwrap() {
            Outcome::Result(v) => assert_eq!(v, serde_json::json!(["aaaa"])),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_unsolicited_id_is_noop() {
        let mut reg = PendingRegistry::new();
        assert!(!reg.complete("nope", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn reset_all_completes_every_slot() {
        let mut reg = PendingRegistry::new();
        let rx1 = reg.insert("a".into());
        let rx2 = reg.insert("b".into());
        reg.reset_all();
        assert!(reg.is_empty());
        assert!(matches!(rx1.await.unwrap(), Outcome::ConnectionReset));
        assert!(matches!(rx2.await.unwrap(), Outcome::ConnectionReset));
    }

    #[tokio::test]
    async fn cancel_removes_without_completing() {
        let mut reg = PendingRegistry::new();
        let rx = reg.insert("a".into());
        reg.cancel("a");
        assert!(!reg.contains("a"));
        // Sender was dropped, so the receiver resolves to a RecvError.
        assert!(rx.await.is_err());
    }
}
