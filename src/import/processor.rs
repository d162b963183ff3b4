//! Import processor
//!
//! Drives an uploaded object to a terminal transaction status: claims the
//! transaction, validates the content, persists the invoice or rejects the
//! upload, and notifies and disconnects the owning client.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;

use crate::import::adapters::{AuditBus, ObjectStorage, PushChannel};
use crate::import::status::TransactionStatus;
use crate::import::store::{ImportStore, StatusUpdate};
use crate::import::types::{AuditEvent, AuditReason, Invoice, InvoiceFile, ObjectCreated, Transaction};

const MIN_INVOICE_NUMBER_LEN: usize = 5;

pub struct ImportProcessor {
    store: Arc<ImportStore>,
    storage: Arc<dyn ObjectStorage>,
    channel: Arc<dyn PushChannel>,
    bus: Arc<dyn AuditBus>,
}

impl ImportProcessor {
    pub fn new(
        store: Arc<ImportStore>,
        storage: Arc<dyn ObjectStorage>,
        channel: Arc<dyn PushChannel>,
        bus: Arc<dyn AuditBus>,
    ) -> Self {
        Self {
            store,
            storage,
            channel,
            bus,
        }
    }

    /// Process one object-store notification batch.
    ///
    /// Records are independent: a failure is logged and must not abort the
    /// siblings. No retry here; redelivery belongs to the event source.
    pub async fn process_batch(&self, notices: Vec<ObjectCreated>) {
        for notice in notices {
            if let Err(e) = self.process_one(&notice.key).await {
                log::error!("import of object {} failed: {:#}", notice.key, e);
            }
        }
    }

    /// Process a single uploaded object.
    pub async fn process_one(&self, key: &str) -> Result<()> {
        let Some(transaction) = self.store.get_transaction(key)? else {
            // Orphaned object: no transaction means no client to notify.
            log::warn!("no transaction for uploaded object {}, skipping", key);
            return Ok(());
        };

        if transaction.status != TransactionStatus::Generated {
            return self.resolve_stale(key, &transaction).await;
        }

        // Claim the upload. Losing the claim means a cancellation or the
        // TTL sweep got there first; the stored status is authoritative.
        match self
            .store
            .update_status_if(key, TransactionStatus::Generated, TransactionStatus::Received)?
        {
            StatusUpdate::Applied(_) => {
                self.channel
                    .push_status(key, &transaction.connection_id, TransactionStatus::Received)
                    .await;
            }
            StatusUpdate::Conflict(actual) => {
                let mut stale = transaction;
                stale.status = actual;
                return self.resolve_stale(key, &stale).await;
            }
            StatusUpdate::NotFound => {
                log::warn!("transaction {} expired while claiming the upload", key);
                return Ok(());
            }
        }

        let body = self
            .storage
            .get(key)
            .await?
            .ok_or_else(|| anyhow!("uploaded object {} disappeared before processing", key))?;

        let file: InvoiceFile = match serde_json::from_slice(&body) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("object {} is not a parsable invoice file: {}", key, e);
                InvoiceFile::default()
            }
        };

        if file.invoice_number.len() < MIN_INVOICE_NUMBER_LEN {
            self.reject(key, &transaction, &file).await
        } else {
            self.accept(key, &transaction, file).await
        }
    }

    /// Step-2 guard: the transaction already left GENERATED (cancelled,
    /// timed out or previously processed). Tell the client where it
    /// actually stands and close the connection.
    async fn resolve_stale(&self, key: &str, transaction: &Transaction) -> Result<()> {
        log::warn!(
            "object {} arrived for transaction in status {}, not importing",
            key,
            transaction.status.as_str()
        );
        self.channel
            .push_status(key, &transaction.connection_id, transaction.status)
            .await;
        self.channel.terminate(&transaction.connection_id).await;
        Ok(())
    }

    async fn reject(&self, key: &str, transaction: &Transaction, file: &InvoiceFile) -> Result<()> {
        let update = self.store.update_status_if(
            key,
            TransactionStatus::Received,
            TransactionStatus::NonValidInvoiceNumber,
        )?;
        if !matches!(update, StatusUpdate::Applied(_)) {
            log::warn!("transaction {} moved ahead of the rejection: {:?}", key, update);
        }

        let status_push = self.channel.push_status(
            key,
            &transaction.connection_id,
            TransactionStatus::NonValidInvoiceNumber,
        );
        let reason_push = self.channel.push(
            &transaction.connection_id,
            json!({
                "transactionId": key,
                "message": format!(
                    "invoice number must have at least {} characters",
                    MIN_INVOICE_NUMBER_LEN
                ),
            }),
        );
        tokio::join!(status_push, reason_push);

        self.bus
            .publish(AuditEvent::import_failure(
                AuditReason::FailNoInvoiceNumber,
                json!({ "key": key, "owner": file.customer_name }),
            ))
            .await;

        self.storage.delete(key).await?;
        self.channel.terminate(&transaction.connection_id).await;

        log::info!("rejected upload {}: invoice number too short", key);
        Ok(())
    }

    async fn accept(&self, key: &str, transaction: &Transaction, file: InvoiceFile) -> Result<()> {
        let invoice = Invoice {
            owner: file.customer_name,
            invoice_number: file.invoice_number,
            total_value: file.total_value,
            product_id: file.product_id,
            quantity: file.quantity,
            transaction_id: key.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.put_invoice(&invoice)?;

        // Deletion and the final status update are not transactional; a
        // crash in between leaves the invoice persisted with a stale
        // status, which the step-2 guard absorbs on redelivery.
        self.storage.delete(key).await?;

        let update =
            self.store
                .update_status_if(key, TransactionStatus::Received, TransactionStatus::Processed)?;
        if !matches!(update, StatusUpdate::Applied(_)) {
            log::warn!("transaction {} moved ahead of completion: {:?}", key, update);
        }

        self.channel
            .push_status(key, &transaction.connection_id, TransactionStatus::Processed)
            .await;
        self.channel.terminate(&transaction.connection_id).await;

        log::info!(
            "imported invoice {} for {} (transaction {})",
            invoice.invoice_number,
            invoice.owner,
            key
        );
        Ok(())
    }
}
