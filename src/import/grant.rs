//! Upload grant issuer
//!
//! Creates the one-time upload target and the GENERATED transaction that
//! tracks it.

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::import::adapters::{ObjectStorage, PushChannel};
use crate::import::status::TransactionStatus;
use crate::import::store::ImportStore;
use crate::import::types::{Transaction, UploadGrant};

/// Grant timing knobs.
#[derive(Debug, Clone)]
pub struct GrantConfig {
    /// Validity window of the presigned upload URL (seconds)
    pub expires_in: u64,
    /// Lifetime of the transaction record before the store removes it
    /// (seconds)
    pub ttl_secs: i64,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            expires_in: 300,
            ttl_secs: 120,
        }
    }
}

pub struct UploadGrantIssuer {
    store: Arc<ImportStore>,
    storage: Arc<dyn ObjectStorage>,
    channel: Arc<dyn PushChannel>,
    config: GrantConfig,
}

impl UploadGrantIssuer {
    pub fn new(
        store: Arc<ImportStore>,
        storage: Arc<dyn ObjectStorage>,
        channel: Arc<dyn PushChannel>,
        config: GrantConfig,
    ) -> Self {
        Self {
            store,
            storage,
            channel,
            config,
        }
    }

    /// Issue a grant for the calling connection.
    ///
    /// A store or object-store failure propagates and fails the request;
    /// nothing is retried. The grant push is best-effort like every other
    /// channel write.
    pub async fn issue(&self, connection_id: &str, request_id: &str) -> Result<UploadGrant> {
        let key = Uuid::new_v4().to_string();

        let url = self
            .storage
            .presign_put(&key, self.config.expires_in as u32)
            .await?;

        let now = chrono::Utc::now();
        let transaction = Transaction {
            transaction_id: key.clone(),
            status: TransactionStatus::Generated,
            created_at: now.timestamp_millis(),
            ttl: now.timestamp() + self.config.ttl_secs,
            expires_in: self.config.expires_in,
            connection_id: connection_id.to_string(),
            request_id: request_id.to_string(),
        };
        self.store
            .create_transaction(&transaction)
            .context("failed to create upload transaction")?;

        log::info!(
            "issued upload grant {} for connection {} (request {})",
            key,
            connection_id,
            request_id
        );

        let grant = UploadGrant {
            url,
            expires: self.config.expires_in,
            transaction_id: key,
        };
        self.channel
            .push(connection_id, serde_json::to_value(&grant)?)
            .await;

        Ok(grant)
    }
}
