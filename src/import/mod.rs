//! Import module - main module file
//!
//! Upload grants, the invoice transaction state machine, and the
//! event-triggered handlers that drive an uploaded invoice to a terminal
//! status.

pub mod status;
pub mod types;
pub mod store;
pub mod grant;
pub mod processor;
pub mod cancel;
pub mod watcher;
pub mod recorder;
pub mod adapters;

// Re-export commonly used types
pub use status::TransactionStatus;
pub use types::{AuditEvent, AuditReason, Invoice, InvoiceFile, InvoiceTrailEntry, ObjectCreated, StatusMessage, Transaction, UploadGrant};
pub use store::{ImportStore, RecordImage, StatusUpdate, StoreEvent};
pub use grant::{GrantConfig, UploadGrantIssuer};
pub use processor::ImportProcessor;
pub use cancel::{CancelOutcome, CancellationHandler};
pub use watcher::ExpiryWatcher;
pub use recorder::InvoiceEventRecorder;
