//! Pending-request table pairing OSC queries with their asynchronous replies
//!
//! AbletonOSC answers on the query's own address and echoes the query
//! arguments (track index, clip slot, ...) at the front of the reply. That
//! pair is the correlation key. UDP does not preserve ordering, so replies are
//! matched by key and never by arrival order.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

use super::codec::{OscArg, OscMessage};
use crate::error::{BridgeError, BridgeResult};

/// Reply delivered to a waiting request: the reply arguments with the echoed
/// key arguments stripped
pub type ReplySlot = oneshot::Sender<BridgeResult<Vec<OscArg>>>;

/// Identifies which reply a query is waiting for
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationKey {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl CorrelationKey {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// A reply matches when it shares the address and starts with the key args
    pub fn matches(&self, reply: &OscMessage) -> bool {
        reply.address == self.address
            && reply.args.len() >= self.args.len()
            && self
                .args
                .iter()
                .zip(reply.args.iter())
                .all(|(a, b)| a.loosely_eq(b))
    }
}

struct Pending {
    key: CorrelationKey,
    slot: ReplySlot,
}

#[derive(Default)]
struct TableInner {
    next_id: u64,
    /// Ordered by id so the oldest matching request wins
    entries: BTreeMap<u64, Pending>,
}

/// In-flight requests awaiting replies
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<TableInner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request; the returned ticket removes the entry when dropped,
    /// so timeouts and cancelled callers never leave state behind
    pub fn register(
        self: &Arc<Self>,
        key: CorrelationKey,
    ) -> (PendingTicket, oneshot::Receiver<BridgeResult<Vec<OscArg>>>) {
        let (slot, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        trace!(id, address = %key.address, "registered pending request");
        inner.entries.insert(id, Pending { key, slot });

        (
            PendingTicket {
                id,
                table: Arc::clone(self),
            },
            rx,
        )
    }

    /// Deliver a reply to the oldest matching request. Returns false when no
    /// request was waiting for it (a stale reply).
    pub fn resolve(&self, reply: OscMessage) -> bool {
        let pending = {
            let mut inner = self.inner.lock();
            let id = inner
                .entries
                .iter()
                .find(|(_, p)| p.key.matches(&reply))
                .map(|(id, _)| *id);
            match id.and_then(|id| inner.entries.remove(&id)) {
                Some(p) => p,
                None => return false,
            }
        };

        let echoed = pending.key.args.len();
        let payload = reply.args.into_iter().skip(echoed).collect();
        // The receiver may have given up in the meantime; that is fine
        let _ = pending.slot.send(Ok(payload));
        true
    }

    /// Fail every in-flight request with the same error
    pub fn fail_all(&self, err: BridgeError) -> usize {
        let drained = std::mem::take(&mut self.inner.lock().entries);
        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.slot.send(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        if self.inner.lock().entries.remove(&id).is_some() {
            trace!(id, "dropped unanswered pending request");
        }
    }
}

/// Owning handle on one pending entry
pub struct PendingTicket {
    id: u64,
    table: Arc<PendingTable>,
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_reply(index: i32, name: &str) -> OscMessage {
        OscMessage::new(
            "/live/track/get/name",
            vec![OscArg::Int(index), OscArg::Str(name.to_string())],
        )
    }

    #[tokio::test]
    async fn test_reply_routed_by_key_not_order() {
        let table = Arc::new(PendingTable::new());
        let (_t0, rx0) = table.register(CorrelationKey::new("/live/track/get/name", vec![OscArg::Int(0)]));
        let (_t1, rx1) = table.register(CorrelationKey::new("/live/track/get/name", vec![OscArg::Int(1)]));

        // Replies arrive reversed
        assert!(table.resolve(name_reply(1, "Lead")));
        assert!(table.resolve(name_reply(0, "Bass 1")));

        assert_eq!(rx0.await.unwrap().unwrap(), vec![OscArg::Str("Bass 1".into())]);
        assert_eq!(rx1.await.unwrap().unwrap(), vec![OscArg::Str("Lead".into())]);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded() {
        let table = Arc::new(PendingTable::new());
        let (_t, _rx) = table.register(CorrelationKey::new("/live/track/get/name", vec![OscArg::Int(0)]));

        assert!(!table.resolve(name_reply(7, "ghost")));
        assert!(!table.resolve(OscMessage::new("/live/song/get/tempo", vec![OscArg::Float(120.0)])));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_identical_keys_resolve_oldest_first() {
        let table = Arc::new(PendingTable::new());
        let key = CorrelationKey::new("/live/song/get/tempo", vec![]);
        let (_a, rx_a) = table.register(key.clone());
        let (_b, rx_b) = table.register(key);

        table.resolve(OscMessage::new("/live/song/get/tempo", vec![OscArg::Float(120.0)]));
        assert_eq!(rx_a.await.unwrap().unwrap(), vec![OscArg::Float(120.0)]);
        assert_eq!(table.len(), 1);
        drop(rx_b);
    }

    #[test]
    fn test_dropped_ticket_clears_entry() {
        let table = Arc::new(PendingTable::new());
        let (ticket, _rx) = table.register(CorrelationKey::new("/live/test", vec![]));
        assert_eq!(table.len(), 1);
        drop(ticket);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_reports_error_to_every_waiter() {
        let table = Arc::new(PendingTable::new());
        let (_a, rx_a) = table.register(CorrelationKey::new("/live/test", vec![]));
        let (_b, rx_b) = table.register(CorrelationKey::new("/live/song/get/num_tracks", vec![]));

        assert_eq!(table.fail_all(BridgeError::Connection("refused".into())), 2);
        assert!(matches!(rx_a.await.unwrap(), Err(BridgeError::Connection(_))));
        assert!(matches!(rx_b.await.unwrap(), Err(BridgeError::Connection(_))));
    }
}
