use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger entry for a payment or refund against a booking. Append-only: a
/// completed payment row is mutated only to attach refund linkage fields
/// when it is later refunded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub booking_id: String,
    pub user_id: String,
    /// Gateway-assigned reference, unique across the ledger.
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    /// Opaque gateway payload, stored verbatim for audit.
    pub payment_response: Option<serde_json::Value>,
    pub refund_id: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Payment,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "refund" => TransactionType::Refund,
            _ => TransactionType::Payment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => TransactionStatus::Completed,
            "failed" => TransactionStatus::Failed,
            "refunded" => TransactionStatus::Refunded,
            _ => TransactionStatus::Pending,
        }
    }
}
