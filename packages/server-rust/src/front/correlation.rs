//! Routes asynchronous replies back to the call waiting for them.
//!
//! A call registers its `(user id, product id)` key before submitting and gets
//! a [`Registration`] that owns the reply receiver. Dropping the registration
//! removes the entry, so every exit path of the call (reply, timeout, cancel,
//! or the caller's future being dropped) cleans up.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flashsale_core::{RequestId, RequestKey, SaleResult};
use tokio::sync::oneshot;

use crate::error::SaleError;

#[derive(Debug)]
struct Pending {
    request_id: RequestId,
    reply: oneshot::Sender<SaleResult>,
}

/// Live calls keyed by `(user id, product id)`; at most one per key.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: DashMap<RequestKey, Pending>,
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::DuplicateInFlight`] if another call for the same
    /// key is still waiting. The existing registration is left untouched.
    pub fn register(self: &Arc<Self>, key: RequestKey, request_id: RequestId) -> Result<Registration, SaleError> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(SaleError::DuplicateInFlight),
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    request_id,
                    reply: tx,
                });
                Ok(Registration {
                    table: Arc::clone(self),
                    key,
                    request_id,
                    rx,
                })
            }
        }
    }

    /// Hands `result` to the call that registered its key and request id.
    ///
    /// Returns `false` if no such call is waiting any more, in which case the
    /// result is discarded.
    pub fn deliver(&self, result: SaleResult) -> bool {
        let request_id = result.request_id;
        match self
            .entries
            .remove_if(&result.key(), |_, pending| pending.request_id == request_id)
        {
            Some((_, pending)) => pending.reply.send(result).is_ok(),
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A registered call. Removes its own entry on drop.
#[derive(Debug)]
pub struct Registration {
    table: Arc<CorrelationTable>,
    key: RequestKey,
    request_id: RequestId,
    rx: oneshot::Receiver<SaleResult>,
}

impl Registration {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Waits for the reply. Cancel-safe.
    ///
    /// Returns `None` if the entry was removed without a reply.
    pub async fn reply(&mut self) -> Option<SaleResult> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let request_id = self.request_id;
        self.table
            .entries
            .remove_if(&self.key, |_, pending| pending.request_id == request_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flashsale_core::{Outcome, SaleRequest};

    use super::*;

    fn result_for(user_id: u64, product_id: u64, request_id: RequestId) -> SaleResult {
        let request = SaleRequest {
            request_id,
            user_id,
            product_id,
            client_ip: "ip".to_string(),
            submitted_at_ms: 0,
        };
        SaleResult::rejected(&request, Outcome::SoldOut)
    }

    #[tokio::test]
    async fn delivers_to_the_registered_call() {
        let table = Arc::new(CorrelationTable::new());
        let mut registration = table.register(RequestKey::new(1, 2), 7).unwrap();

        assert!(table.deliver(result_for(1, 2, 7)));
        let reply = registration.reply().await.unwrap();
        assert_eq!(reply.outcome, Outcome::SoldOut);
        assert!(table.is_empty());
    }

    #[test]
    fn second_registration_for_a_key_is_rejected() {
        let table = Arc::new(CorrelationTable::new());
        let key = RequestKey::new(1, 2);
        let _first = table.register(key, 1).unwrap();
        assert_eq!(
            table.register(key, 2).unwrap_err(),
            SaleError::DuplicateInFlight
        );
        assert!(table.contains(&key));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reply_with_stale_request_id_is_discarded() {
        let table = Arc::new(CorrelationTable::new());
        let _registration = table.register(RequestKey::new(1, 2), 8).unwrap();

        assert!(!table.deliver(result_for(1, 2, 7)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_key_is_a_no_op() {
        let table = CorrelationTable::new();
        assert!(!table.deliver(result_for(3, 4, 1)));
    }

    #[test]
    fn dropping_the_registration_removes_the_entry() {
        let table = Arc::new(CorrelationTable::new());
        let key = RequestKey::new(1, 2);
        drop(table.register(key, 1).unwrap());
        assert!(table.is_empty());
        assert!(table.register(key, 2).is_ok());
    }

    #[test]
    fn stale_guard_does_not_remove_a_newer_entry() {
        let table = Arc::new(CorrelationTable::new());
        let key = RequestKey::new(1, 2);
        let first = table.register(key, 1).unwrap();
        // Reply consumed the first entry; a new call for the same key follows.
        assert!(table.deliver(result_for(1, 2, 1)));
        let _second = table.register(key, 2).unwrap();

        drop(first);
        assert!(table.contains(&key));
    }

    #[tokio::test]
    async fn cancelled_wait_still_cleans_up() {
        let table = Arc::new(CorrelationTable::new());
        let key = RequestKey::new(5, 6);
        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let mut registration = table.register(key, 1).unwrap();
                registration.reply().await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(table.contains(&key));

        waiter.abort();
        let _ = waiter.await;
        assert!(table.is_empty());
    }
}
