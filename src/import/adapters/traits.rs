//! External collaborator traits
//!
//! Seams for the object store, the push channel and the audit bus, so
//! handlers take `Arc<dyn _>` and tests substitute the in-memory mocks.

use async_trait::async_trait;

use anyhow::Result;
use bytes::Bytes;
use serde_json::Value;

use crate::import::status::TransactionStatus;
use crate::import::types::{AuditEvent, StatusMessage};

/// Object store holding uploaded invoice files.
///
/// Errors are real: callers propagate them and fail the triggering
/// invocation (batched callers isolate the failure to one record).
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Presign a one-time PUT grant for `key`, valid for `expires_in` seconds.
    async fn presign_put(&self, key: &str, expires_in: u32) -> Result<String>;

    /// Fetch an object; `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Push channel addressed by connection id.
///
/// Strictly best-effort: every method swallows transport errors (channel
/// closed, connection evicted, server unreachable) and reports plain
/// `false`. Callers must not assume delivery.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Attempt delivery of a payload to one connection.
    async fn push(&self, connection_id: &str, payload: Value) -> bool;

    /// Best-effort forced close of a connection.
    async fn terminate(&self, connection_id: &str) -> bool;

    /// Push the `{transactionId, status}` envelope to a connection.
    async fn push_status(
        &self,
        transaction_id: &str,
        connection_id: &str,
        status: TransactionStatus,
    ) -> bool {
        let envelope = StatusMessage {
            transaction_id: transaction_id.to_string(),
            status,
        };
        match serde_json::to_value(&envelope) {
            Ok(payload) => self.push(connection_id, payload).await,
            Err(e) => {
                log::error!("failed to encode status envelope for {}: {}", transaction_id, e);
                false
            }
        }
    }
}

/// Fire-and-forget publisher of audit events to the external alerting bus.
#[async_trait]
pub trait AuditBus: Send + Sync {
    async fn publish(&self, event: AuditEvent);
}
