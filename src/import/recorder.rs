//! Invoice event recorder
//!
//! Consumes the store's insert notifications for invoice images and
//! writes an immutable trail entry per persisted invoice. Purely
//! additive; the transaction record is never touched.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::import::store::{ImportStore, RecordImage, StoreEvent};
use crate::import::types::{Invoice, InvoiceTrailEntry};

const INVOICE_CREATED: &str = "INVOICE_CREATED";

pub struct InvoiceEventRecorder {
    store: Arc<ImportStore>,
}

impl InvoiceEventRecorder {
    pub fn new(store: Arc<ImportStore>) -> Self {
        Self { store }
    }

    /// Record one persisted invoice in the audit trail.
    pub fn handle_inserted(&self, invoice: &Invoice) -> Result<()> {
        let entry = InvoiceTrailEntry {
            owner: invoice.owner.clone(),
            event_type: INVOICE_CREATED.to_string(),
            invoice_number: invoice.invoice_number.clone(),
            transaction_id: invoice.transaction_id.clone(),
            product_id: invoice.product_id.clone(),
            quantity: invoice.quantity,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.append_trail(&entry)
    }

    /// Consume the change stream until it closes.
    pub async fn run(&self, mut events: broadcast::Receiver<StoreEvent>) {
        log::info!("invoice event recorder started");

        loop {
            match events.recv().await {
                Ok(StoreEvent::Inserted(RecordImage::Invoice(invoice))) => {
                    if let Err(e) = self.handle_inserted(&invoice) {
                        log::error!(
                            "failed to record trail entry for invoice {}: {:#}",
                            invoice.invoice_number,
                            e
                        );
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("invoice recorder lagged, {} store events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        events: broadcast::Receiver<StoreEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(events).await;
        })
    }
}
