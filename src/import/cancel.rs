//! Cancellation handler
//!
//! Client-initiated abort of a GENERATED transaction. The mirror guard of
//! the processor's stale check: both treat "not GENERATED" as already
//! resolved.

use std::sync::Arc;

use anyhow::Result;

use crate::import::adapters::PushChannel;
use crate::import::status::TransactionStatus;
use crate::import::store::{ImportStore, StatusUpdate};

/// What the caller should report back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Transaction cancelled; report success
    Canceled,
    /// Absent or already resolved; report a client error
    NotFound,
}

pub struct CancellationHandler {
    store: Arc<ImportStore>,
    channel: Arc<dyn PushChannel>,
}

impl CancellationHandler {
    pub fn new(store: Arc<ImportStore>, channel: Arc<dyn PushChannel>) -> Self {
        Self { store, channel }
    }

    /// Cancel a transaction on behalf of the calling connection.
    ///
    /// The connection is closed on every path; only the pushed status and
    /// the reported outcome differ.
    pub async fn handle(&self, transaction_id: &str, connection_id: &str) -> Result<CancelOutcome> {
        let outcome = match self.store.get_transaction(transaction_id)? {
            Some(tx) if tx.status == TransactionStatus::Generated => {
                match self.store.update_status_if(
                    transaction_id,
                    TransactionStatus::Generated,
                    TransactionStatus::Canceled,
                )? {
                    StatusUpdate::Applied(_) => {
                        log::info!("cancelled transaction {}", transaction_id);
                        CancelOutcome::Canceled
                    }
                    // The importer or the TTL sweep won the race between
                    // our read and the swap.
                    StatusUpdate::Conflict(actual) => {
                        log::warn!(
                            "cannot cancel transaction {}: status moved to {}",
                            transaction_id,
                            actual.as_str()
                        );
                        CancelOutcome::NotFound
                    }
                    StatusUpdate::NotFound => {
                        log::warn!("transaction {} expired during cancellation", transaction_id);
                        CancelOutcome::NotFound
                    }
                }
            }
            Some(tx) => {
                log::warn!(
                    "cannot cancel transaction {}: status is {}",
                    transaction_id,
                    tx.status.as_str()
                );
                CancelOutcome::NotFound
            }
            None => {
                log::warn!("transaction not found: {}", transaction_id);
                CancelOutcome::NotFound
            }
        };

        let status = match outcome {
            CancelOutcome::Canceled => TransactionStatus::Canceled,
            CancelOutcome::NotFound => TransactionStatus::NotFound,
        };
        self.channel.push_status(transaction_id, connection_id, status).await;
        self.channel.terminate(connection_id).await;

        Ok(outcome)
    }
}
