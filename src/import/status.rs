//! Invoice Transaction State Machine
//!
//! Defines the transaction statuses and the forward-only transition table
//! shared by every import handler.

use serde::{Deserialize, Serialize};

/// Status of an invoice import transaction.
///
/// `Generated` through `NonValidInvoiceNumber` are stored in the
/// transaction store; `Timeout` and `NotFound` exist only on the wire,
/// pushed to clients when a record expired or was never there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Upload URL issued, waiting for the object
    Generated,
    /// Upload observed, content being processed
    Received,
    /// Invoice persisted, import complete
    Processed,
    /// Client aborted before uploading
    Canceled,
    /// Content rejected: invoice number missing or too short
    NonValidInvoiceNumber,
    /// TTL elapsed before the import finished (wire-only)
    Timeout,
    /// No such transaction (wire-only)
    NotFound,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Generated => "GENERATED",
            TransactionStatus::Received => "RECEIVED",
            TransactionStatus::Processed => "PROCESSED",
            TransactionStatus::Canceled => "CANCELED",
            TransactionStatus::NonValidInvoiceNumber => "NON_VALID_INVOICE_NUMBER",
            TransactionStatus::Timeout => "TIMEOUT",
            TransactionStatus::NotFound => "NOT_FOUND",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GENERATED" => Some(TransactionStatus::Generated),
            "RECEIVED" => Some(TransactionStatus::Received),
            "PROCESSED" => Some(TransactionStatus::Processed),
            "CANCELED" => Some(TransactionStatus::Canceled),
            "NON_VALID_INVOICE_NUMBER" => Some(TransactionStatus::NonValidInvoiceNumber),
            "TIMEOUT" => Some(TransactionStatus::Timeout),
            "NOT_FOUND" => Some(TransactionStatus::NotFound),
            _ => None,
        }
    }

    /// Check if no handler writes this status again once stored.
    ///
    /// `Received` is not terminal: the processor still advances it to
    /// `Processed` or `NonValidInvoiceNumber` within the same invocation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Processed
                | TransactionStatus::Canceled
                | TransactionStatus::NonValidInvoiceNumber
        )
    }

    /// Check whether `next` is a legal forward transition from this status.
    ///
    /// The store rejects any status write outside this table, which is what
    /// keeps a transaction from ever moving backward.
    pub fn can_advance_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        matches!(
            (self, next),
            (Generated, Received) | (Generated, Canceled) | (Received, Processed) | (Received, NonValidInvoiceNumber)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Terminality =====

    #[test]
    fn test_terminal_statuses() {
        assert!(TransactionStatus::Processed.is_terminal());
        assert!(TransactionStatus::Canceled.is_terminal());
        assert!(TransactionStatus::NonValidInvoiceNumber.is_terminal());

        assert!(!TransactionStatus::Generated.is_terminal());
        assert!(!TransactionStatus::Received.is_terminal());
    }

    // ===== Wire string round trip =====

    #[test]
    fn test_status_string_roundtrip() {
        let statuses = vec![
            TransactionStatus::Generated,
            TransactionStatus::Received,
            TransactionStatus::Processed,
            TransactionStatus::Canceled,
            TransactionStatus::NonValidInvoiceNumber,
            TransactionStatus::Timeout,
            TransactionStatus::NotFound,
        ];

        for status in statuses {
            let s = status.as_str();
            let parsed = TransactionStatus::from_str(s).unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_invalid_status_string() {
        assert!(TransactionStatus::from_str("invalid").is_none());
        assert!(TransactionStatus::from_str("").is_none());
        assert!(TransactionStatus::from_str("generated").is_none());
    }

    #[test]
    fn test_serde_matches_wire_strings() {
        let json = serde_json::to_string(&TransactionStatus::NonValidInvoiceNumber).unwrap();
        assert_eq!(json, "\"NON_VALID_INVOICE_NUMBER\"");

        let parsed: TransactionStatus = serde_json::from_str("\"NOT_FOUND\"").unwrap();
        assert_eq!(parsed, TransactionStatus::NotFound);
    }

    // ===== Transition table =====

    #[test]
    fn test_forward_transitions() {
        use TransactionStatus::*;

        assert!(Generated.can_advance_to(Received));
        assert!(Generated.can_advance_to(Canceled));
        assert!(Received.can_advance_to(Processed));
        assert!(Received.can_advance_to(NonValidInvoiceNumber));
    }

    #[test]
    fn test_terminal_statuses_are_stable() {
        use TransactionStatus::*;

        for terminal in [Processed, Canceled, NonValidInvoiceNumber] {
            for next in [Generated, Received, Processed, Canceled, NonValidInvoiceNumber] {
                assert!(!terminal.can_advance_to(next));
            }
        }
    }

    #[test]
    fn test_no_backward_transitions() {
        use TransactionStatus::*;

        assert!(!Received.can_advance_to(Generated));
        assert!(!Processed.can_advance_to(Received));
        assert!(!Canceled.can_advance_to(Generated));
    }

    #[test]
    fn test_wire_only_statuses_never_stored() {
        use TransactionStatus::*;

        for stored in [Generated, Received] {
            assert!(!stored.can_advance_to(Timeout));
            assert!(!stored.can_advance_to(NotFound));
        }
    }
}
