//! Transaction store
//!
//! Sled-backed store for transactions, invoices and the invoice audit
//! trail, with conditional status updates and an insert/remove change
//! stream. The store owns the transaction lifecycle end to end: handlers
//! create and advance records, the TTL sweeper removes them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::import::status::TransactionStatus;
use crate::import::types::{Invoice, InvoiceTrailEntry, Transaction};

const CHANGE_STREAM_CAPACITY: usize = 256;

/// Last-known image carried by a change notification.
#[derive(Debug, Clone)]
pub enum RecordImage {
    Transaction(Transaction),
    Invoice(Invoice),
}

/// Change-stream notification, emitted per mutating write.
///
/// Only inserts and removes are published; status updates stay silent
/// because no consumer reads them. Removes carry the last record image.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Inserted(RecordImage),
    Removed(RecordImage),
}

/// Outcome of a conditional status update.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// Transition applied; carries the updated record
    Applied(Transaction),
    /// No record under that key
    NotFound,
    /// Record exists but its status differs from the expected one;
    /// carries the status actually stored
    Conflict(TransactionStatus),
}

/// Sled-backed import store.
///
/// Transactions, invoices and the trail are separate trees of one
/// embedded database; records are serde_json-encoded.
pub struct ImportStore {
    transactions: sled::Tree,
    invoices: sled::Tree,
    trail: sled::Tree,
    events: broadcast::Sender<StoreEvent>,
}

impl ImportStore {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("failed to open import store at {}", path))?;
        Self::from_db(db)
    }

    /// In-memory store for tests; nothing touches disk.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("failed to open temporary import store")?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let transactions = db.open_tree("transactions").context("failed to open transactions tree")?;
        let invoices = db.open_tree("invoices").context("failed to open invoices tree")?;
        let trail = db.open_tree("invoice_trail").context("failed to open invoice trail tree")?;
        let (events, _) = broadcast::channel(CHANGE_STREAM_CAPACITY);

        Ok(Self {
            transactions,
            invoices,
            trail,
            events,
        })
    }

    /// Subscribe to the insert/remove change stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // Send only fails when nobody subscribed, which is fine.
        let _ = self.events.send(event);
    }

    /// Unconditional insert of a new transaction record.
    pub fn create_transaction(&self, tx: &Transaction) -> Result<()> {
        let encoded = serde_json::to_vec(tx).context("failed to encode transaction")?;
        self.transactions
            .insert(tx.transaction_id.as_bytes(), encoded)
            .context("transaction store unavailable")?;

        self.publish(StoreEvent::Inserted(RecordImage::Transaction(tx.clone())));
        Ok(())
    }

    pub fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        let bytes = self
            .transactions
            .get(transaction_id.as_bytes())
            .context("transaction store unavailable")?;

        match bytes {
            Some(bytes) => {
                let tx = serde_json::from_slice(&bytes).context("failed to decode transaction record")?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    /// Conditional status transition (optimistic compare-and-swap).
    ///
    /// Applies `expected -> new` only if the stored status still equals
    /// `expected`; a concurrent handler that already moved the record wins
    /// and the caller gets `Conflict` with the status actually stored.
    /// Transitions outside the state-machine table are refused outright.
    pub fn update_status_if(
        &self,
        transaction_id: &str,
        expected: TransactionStatus,
        new: TransactionStatus,
    ) -> Result<StatusUpdate> {
        ensure!(
            expected.can_advance_to(new),
            "illegal status transition {} -> {}",
            expected.as_str(),
            new.as_str()
        );

        loop {
            let current = self
                .transactions
                .get(transaction_id.as_bytes())
                .context("transaction store unavailable")?;

            let Some(current) = current else {
                return Ok(StatusUpdate::NotFound);
            };

            let tx: Transaction =
                serde_json::from_slice(&current).context("failed to decode transaction record")?;
            if tx.status != expected {
                return Ok(StatusUpdate::Conflict(tx.status));
            }

            let mut updated = tx;
            updated.status = new;
            let encoded = serde_json::to_vec(&updated).context("failed to encode transaction")?;

            let swap = self
                .transactions
                .compare_and_swap(transaction_id.as_bytes(), Some(current), Some(encoded))
                .context("transaction store unavailable")?;

            match swap {
                Ok(()) => return Ok(StatusUpdate::Applied(updated)),
                // Lost a race against another writer; re-read and re-check.
                Err(_) => continue,
            }
        }
    }

    /// Persist an invoice, keyed by owner + invoice number.
    pub fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        let key = invoice_key(&invoice.owner, &invoice.invoice_number);
        let encoded = serde_json::to_vec(invoice).context("failed to encode invoice")?;
        self.invoices
            .insert(key.as_bytes(), encoded)
            .context("invoice store unavailable")?;

        self.publish(StoreEvent::Inserted(RecordImage::Invoice(invoice.clone())));
        Ok(())
    }

    pub fn get_invoice(&self, owner: &str, invoice_number: &str) -> Result<Option<Invoice>> {
        let bytes = self
            .invoices
            .get(invoice_key(owner, invoice_number).as_bytes())
            .context("invoice store unavailable")?;

        match bytes {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("failed to decode invoice record")?,
            )),
            None => Ok(None),
        }
    }

    /// Append an entry to the invoice audit trail.
    ///
    /// The trail is append-only and publishes no change notifications.
    pub fn append_trail(&self, entry: &InvoiceTrailEntry) -> Result<()> {
        let key = format!("{}#{:020}#{}", entry.owner, entry.created_at, entry.invoice_number);
        let encoded = serde_json::to_vec(entry).context("failed to encode trail entry")?;
        self.trail
            .insert(key.as_bytes(), encoded)
            .context("invoice trail unavailable")?;
        Ok(())
    }

    /// Trail entries for one owner, in insertion order.
    pub fn trail_for_owner(&self, owner: &str) -> Result<Vec<InvoiceTrailEntry>> {
        let prefix = format!("{}#", owner);
        let mut entries = Vec::new();
        for item in self.trail.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item.context("invoice trail unavailable")?;
            entries.push(serde_json::from_slice(&bytes).context("failed to decode trail entry")?);
        }
        Ok(entries)
    }

    /// Remove every transaction whose TTL elapsed, emitting a `Removed`
    /// notification with the last-known image for each.
    ///
    /// Removal uses compare-and-swap so a record mutated mid-sweep is left
    /// for the next pass instead of losing the write.
    pub fn sweep_expired(&self, now_secs: i64) -> Result<Vec<Transaction>> {
        let mut removed = Vec::new();

        for item in self.transactions.iter() {
            let (key, bytes) = item.context("transaction store unavailable")?;
            let tx: Transaction = match serde_json::from_slice(&bytes) {
                Ok(tx) => tx,
                Err(e) => {
                    log::warn!("skipping undecodable transaction record during sweep: {}", e);
                    continue;
                }
            };

            if tx.ttl > now_secs {
                continue;
            }

            let swap = self
                .transactions
                .compare_and_swap(&key, Some(bytes), None as Option<&[u8]>)
                .context("transaction store unavailable")?;

            if swap.is_ok() {
                self.publish(StoreEvent::Removed(RecordImage::Transaction(tx.clone())));
                removed.push(tx);
            }
        }

        Ok(removed)
    }

    /// Run the TTL sweep on an interval in a background task.
    pub fn spawn_ttl_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        log::info!("ttl sweeper started (interval={:?})", interval);

        tokio::spawn(async move {
            loop {
                sleep(interval).await;

                match self.sweep_expired(chrono::Utc::now().timestamp()) {
                    Ok(removed) if !removed.is_empty() => {
                        log::info!("ttl sweep removed {} expired transactions", removed.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("ttl sweep failed: {:#}", e);
                    }
                }
            }
        })
    }
}

fn invoice_key(owner: &str, invoice_number: &str) -> String {
    format!("{}#{}", owner, invoice_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(id: &str, status: TransactionStatus, ttl: i64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            status,
            created_at: chrono::Utc::now().timestamp_millis(),
            ttl,
            expires_in: 300,
            connection_id: "conn-1".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    fn far_ttl() -> i64 {
        chrono::Utc::now().timestamp() + 120
    }

    // ===== Transaction CRUD =====

    #[test]
    fn test_create_and_get_roundtrip() {
        let store = ImportStore::temporary().unwrap();
        let tx = transaction("t-1", TransactionStatus::Generated, far_ttl());

        store.create_transaction(&tx).unwrap();

        let loaded = store.get_transaction("t-1").unwrap().unwrap();
        assert_eq!(loaded.transaction_id, "t-1");
        assert_eq!(loaded.status, TransactionStatus::Generated);
        assert_eq!(loaded.connection_id, "conn-1");

        assert!(store.get_transaction("missing").unwrap().is_none());
    }

    // ===== Conditional status updates =====

    #[test]
    fn test_update_status_applied() {
        let store = ImportStore::temporary().unwrap();
        store
            .create_transaction(&transaction("t-1", TransactionStatus::Generated, far_ttl()))
            .unwrap();

        let outcome = store
            .update_status_if("t-1", TransactionStatus::Generated, TransactionStatus::Received)
            .unwrap();

        assert!(matches!(outcome, StatusUpdate::Applied(ref tx) if tx.status == TransactionStatus::Received));
        assert_eq!(
            store.get_transaction("t-1").unwrap().unwrap().status,
            TransactionStatus::Received
        );
    }

    #[test]
    fn test_update_status_conflict_reports_actual() {
        let store = ImportStore::temporary().unwrap();
        store
            .create_transaction(&transaction("t-1", TransactionStatus::Generated, far_ttl()))
            .unwrap();

        // A cancellation wins the race...
        store
            .update_status_if("t-1", TransactionStatus::Generated, TransactionStatus::Canceled)
            .unwrap();

        // ...so the importer's claim is rejected with the stored status.
        let outcome = store
            .update_status_if("t-1", TransactionStatus::Generated, TransactionStatus::Received)
            .unwrap();

        assert!(matches!(outcome, StatusUpdate::Conflict(TransactionStatus::Canceled)));
        assert_eq!(
            store.get_transaction("t-1").unwrap().unwrap().status,
            TransactionStatus::Canceled
        );
    }

    #[test]
    fn test_update_status_not_found() {
        let store = ImportStore::temporary().unwrap();

        let outcome = store
            .update_status_if("ghost", TransactionStatus::Generated, TransactionStatus::Received)
            .unwrap();

        assert!(matches!(outcome, StatusUpdate::NotFound));
    }

    #[test]
    fn test_illegal_transition_refused() {
        let store = ImportStore::temporary().unwrap();
        store
            .create_transaction(&transaction("t-1", TransactionStatus::Generated, far_ttl()))
            .unwrap();

        // Generated cannot jump straight to Processed.
        let result =
            store.update_status_if("t-1", TransactionStatus::Generated, TransactionStatus::Processed);
        assert!(result.is_err());

        // And a terminal status never moves again.
        store
            .update_status_if("t-1", TransactionStatus::Generated, TransactionStatus::Canceled)
            .unwrap();
        let result =
            store.update_status_if("t-1", TransactionStatus::Canceled, TransactionStatus::Received);
        assert!(result.is_err());
    }

    // ===== Change stream =====

    #[test]
    fn test_insert_notifications() {
        let store = ImportStore::temporary().unwrap();
        let mut rx = store.subscribe();

        store
            .create_transaction(&transaction("t-1", TransactionStatus::Generated, far_ttl()))
            .unwrap();

        let invoice = Invoice {
            owner: "jane@example.com".to_string(),
            invoice_number: "INV001".to_string(),
            total_value: 99.90,
            product_id: "p-7".to_string(),
            quantity: 1,
            transaction_id: "t-1".to_string(),
            created_at: 0,
        };
        store.put_invoice(&invoice).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            StoreEvent::Inserted(RecordImage::Transaction(ref tx)) if tx.transaction_id == "t-1"
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            StoreEvent::Inserted(RecordImage::Invoice(ref inv)) if inv.invoice_number == "INV001"
        ));
    }

    #[test]
    fn test_status_updates_do_not_notify() {
        let store = ImportStore::temporary().unwrap();
        store
            .create_transaction(&transaction("t-1", TransactionStatus::Generated, far_ttl()))
            .unwrap();

        let mut rx = store.subscribe();
        store
            .update_status_if("t-1", TransactionStatus::Generated, TransactionStatus::Received)
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    // ===== TTL sweep =====

    #[test]
    fn test_sweep_removes_expired_and_carries_last_image() {
        let store = ImportStore::temporary().unwrap();
        let now = chrono::Utc::now().timestamp();

        store
            .create_transaction(&transaction("expired", TransactionStatus::Generated, now - 5))
            .unwrap();
        store
            .create_transaction(&transaction("alive", TransactionStatus::Generated, now + 120))
            .unwrap();

        let mut rx = store.subscribe();
        let removed = store.sweep_expired(now).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].transaction_id, "expired");
        assert!(store.get_transaction("expired").unwrap().is_none());
        assert!(store.get_transaction("alive").unwrap().is_some());

        assert!(matches!(
            rx.try_recv().unwrap(),
            StoreEvent::Removed(RecordImage::Transaction(ref tx))
                if tx.transaction_id == "expired" && tx.status == TransactionStatus::Generated
        ));
    }

    #[test]
    fn test_sweep_removes_regardless_of_status() {
        let store = ImportStore::temporary().unwrap();
        let now = chrono::Utc::now().timestamp();

        store
            .create_transaction(&transaction("done", TransactionStatus::Generated, now - 1))
            .unwrap();
        store
            .update_status_if("done", TransactionStatus::Generated, TransactionStatus::Canceled)
            .unwrap();

        let removed = store.sweep_expired(now).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].status, TransactionStatus::Canceled);
    }

    // ===== Invoices and trail =====

    #[test]
    fn test_invoice_roundtrip() {
        let store = ImportStore::temporary().unwrap();
        let invoice = Invoice {
            owner: "jane@example.com".to_string(),
            invoice_number: "INV001".to_string(),
            total_value: 99.90,
            product_id: "p-7".to_string(),
            quantity: 2,
            transaction_id: "t-1".to_string(),
            created_at: 1,
        };

        store.put_invoice(&invoice).unwrap();

        let loaded = store.get_invoice("jane@example.com", "INV001").unwrap().unwrap();
        assert_eq!(loaded.total_value, 99.90);
        assert!(store.get_invoice("jane@example.com", "INV999").unwrap().is_none());
    }

    #[test]
    fn test_trail_scoped_by_owner_in_order() {
        let store = ImportStore::temporary().unwrap();

        for (n, number) in ["INV001", "INV002"].iter().enumerate() {
            store
                .append_trail(&InvoiceTrailEntry {
                    owner: "jane@example.com".to_string(),
                    event_type: "INVOICE_CREATED".to_string(),
                    invoice_number: number.to_string(),
                    transaction_id: format!("t-{}", n),
                    product_id: "p-7".to_string(),
                    quantity: 1,
                    created_at: n as i64,
                })
                .unwrap();
        }
        store
            .append_trail(&InvoiceTrailEntry {
                owner: "bob@example.com".to_string(),
                event_type: "INVOICE_CREATED".to_string(),
                invoice_number: "INV100".to_string(),
                transaction_id: "t-9".to_string(),
                product_id: "p-1".to_string(),
                quantity: 1,
                created_at: 0,
            })
            .unwrap();

        let entries = store.trail_for_owner("jane@example.com").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].invoice_number, "INV001");
        assert_eq!(entries[1].invoice_number, "INV002");
    }
}
