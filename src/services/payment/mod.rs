pub mod khalti;
pub mod noop;

use async_trait::async_trait;

/// Successful verification of a client-submitted payment token.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// Gateway-assigned transaction reference.
    pub reference: String,
    /// Raw gateway payload, persisted for audit.
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub refund_reference: String,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway processed the request and said no (bad token, amount
    /// mismatch, non-refundable transaction).
    #[error("{0}")]
    Declined(String),

    /// Transport-level failure: timeout, connection error, 5xx.
    #[error("gateway unreachable: {0}")]
    Unavailable(String),
}

/// Abstract payment processor. Amounts cross this boundary as integer minor
/// currency units (paisa); everything behind it stays decimal major units.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify_payment(
        &self,
        token: &str,
        amount_minor: i64,
    ) -> Result<VerifiedPayment, GatewayError>;

    async fn initiate_refund(
        &self,
        original_reference: &str,
        amount_minor: i64,
    ) -> Result<GatewayRefund, GatewayError>;
}
