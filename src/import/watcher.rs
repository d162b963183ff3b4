//! Expiry watcher
//!
//! Consumes the store's remove notifications. A transaction the TTL sweep
//! removed in any status other than PROCESSED is flagged as a timeout:
//! audit event, TIMEOUT push, and the connection is closed either way.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::import::adapters::{AuditBus, PushChannel};
use crate::import::status::TransactionStatus;
use crate::import::store::{RecordImage, StoreEvent};
use crate::import::types::{AuditEvent, AuditReason, Transaction};

pub struct ExpiryWatcher {
    channel: Arc<dyn PushChannel>,
    bus: Arc<dyn AuditBus>,
}

impl ExpiryWatcher {
    pub fn new(channel: Arc<dyn PushChannel>, bus: Arc<dyn AuditBus>) -> Self {
        Self { channel, bus }
    }

    /// React to one removed transaction image.
    ///
    /// Every non-PROCESSED last image counts as timeout-worthy, including
    /// CANCELED and NON_VALID_INVOICE_NUMBER. That duplicates the
    /// notification a cancelled client already got; preserved as the
    /// system behaves in production, see DESIGN.md.
    pub async fn handle_removed(&self, image: &Transaction) {
        if image.status != TransactionStatus::Processed {
            log::warn!(
                "transaction {} expired in status {}",
                image.transaction_id,
                image.status.as_str()
            );

            let audit = self.bus.publish(AuditEvent::import_failure(
                AuditReason::Timeout,
                json!({
                    "transactionId": image.transaction_id,
                    "connectionId": image.connection_id,
                }),
            ));
            let push = self.channel.push_status(
                &image.transaction_id,
                &image.connection_id,
                TransactionStatus::Timeout,
            );
            tokio::join!(audit, push);
        }

        self.channel.terminate(&image.connection_id).await;
    }

    /// Consume the change stream until it closes.
    pub async fn run(&self, mut events: broadcast::Receiver<StoreEvent>) {
        log::info!("expiry watcher started");

        loop {
            match events.recv().await {
                Ok(StoreEvent::Removed(RecordImage::Transaction(tx))) => {
                    self.handle_removed(&tx).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("expiry watcher lagged, {} store events skipped", skipped);
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
