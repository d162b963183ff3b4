//! Core types for the invoice import system
//!
//! Record shapes, wire envelopes and the audit event, shared by every
//! handler so no module grows its own divergent copy.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::import::status::TransactionStatus;

/// Transaction record tracking one upload-grant-to-import lifecycle.
///
/// The upload object key doubles as the transaction id, so exactly one
/// transaction exists per upload key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Upload key and transaction id (UUID v4 string)
    pub transaction_id: String,
    /// Current status, forward-only per the transition table
    pub status: TransactionStatus,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Absolute instant (epoch seconds) after which the store removes
    /// this record regardless of status
    pub ttl: i64,
    /// Grant validity window handed to the client (seconds)
    pub expires_in: u64,
    /// Push-channel session of the owning client
    pub connection_id: String,
    /// Inbound request id, kept for correlation in logs and audits
    pub request_id: String,
}

/// Persisted invoice, keyed by owner + invoice number.
///
/// Written at most once per transaction, only when the transaction reached
/// `Received` with valid content. There is no update path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub owner: String,
    pub invoice_number: String,
    pub total_value: f64,
    pub product_id: String,
    pub quantity: u32,
    /// Transaction that imported this invoice
    pub transaction_id: String,
    pub created_at: i64,
}

/// Shape of the uploaded JSON document.
///
/// Every field defaults so a malformed or truncated upload parses to an
/// empty invoice number and fails validation instead of erroring out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceFile {
    pub customer_name: String,
    pub invoice_number: String,
    pub total_value: f64,
    pub product_id: String,
    pub quantity: u32,
}

/// Upload grant pushed to the client after a grant request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    /// Presigned PUT URL for the upload
    pub url: String,
    /// URL validity window (seconds)
    pub expires: u64,
    pub transaction_id: String,
}

/// Status envelope pushed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub transaction_id: String,
    pub status: TransactionStatus,
}

/// One entry of an object-store write notification batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectCreated {
    /// Object key = transaction id
    pub key: String,
}

/// Why an audit event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditReason {
    /// Uploaded content had no usable invoice number
    FailNoInvoiceNumber,
    /// Transaction expired before reaching PROCESSED
    Timeout,
}

impl AuditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditReason::FailNoInvoiceNumber => "FAIL_NO_INVOICE_NUMBER",
            AuditReason::Timeout => "TIMEOUT",
        }
    }
}

/// Structured audit event for the external alerting bus.
///
/// Fire-and-forget: emitted, never persisted or read back here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub source: String,
    pub detail_type: String,
    pub detail: Value,
    pub emitted_at: i64,
}

impl AuditEvent {
    /// Build an invoice-import failure event.
    ///
    /// `context` is merged into the detail payload next to `errorDetail`.
    pub fn import_failure(reason: AuditReason, context: Value) -> Self {
        let mut detail = json!({ "errorDetail": reason.as_str() });
        if let (Some(detail_map), Some(context_map)) = (detail.as_object_mut(), context.as_object()) {
            for (k, v) in context_map {
                detail_map.insert(k.clone(), v.clone());
            }
        }

        AuditEvent {
            source: "invoice".to_string(),
            detail_type: "invoice".to_string(),
            detail,
            emitted_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.detail.get("errorDetail").and_then(Value::as_str)
    }
}

/// Immutable audit-trail entry written for every persisted invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceTrailEntry {
    pub owner: String,
    pub event_type: String,
    pub invoice_number: String,
    pub transaction_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub created_at: i64,
}
