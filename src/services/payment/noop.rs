use async_trait::async_trait;
use uuid::Uuid;

use super::{GatewayError, GatewayRefund, PaymentGateway, VerifiedPayment};

/// Development gateway: accepts every token and fabricates references.
/// Selected with GATEWAY_PROVIDER=noop.
pub struct NoopGateway;

#[async_trait]
impl PaymentGateway for NoopGateway {
    async fn verify_payment(
        &self,
        token: &str,
        amount_minor: i64,
    ) -> Result<VerifiedPayment, GatewayError> {
        let reference = format!("noop-{}", Uuid::new_v4());
        tracing::info!(token, amount_minor, reference, "noop gateway accepted payment");
        Ok(VerifiedPayment {
            raw_response: serde_json::json!({
                "provider": "noop",
                "token": token,
                "amount": amount_minor,
                "idx": reference.clone(),
            }),
            reference,
        })
    }

    async fn initiate_refund(
        &self,
        original_reference: &str,
        amount_minor: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        let refund_reference = format!("noop-refund-{}", Uuid::new_v4());
        tracing::info!(
            original_reference,
            amount_minor,
            refund_reference,
            "noop gateway accepted refund"
        );
        Ok(GatewayRefund {
            raw_response: serde_json::json!({
                "provider": "noop",
                "original": original_reference,
                "amount": amount_minor,
                "idx": refund_reference.clone(),
            }),
            refund_reference,
        })
    }
}
