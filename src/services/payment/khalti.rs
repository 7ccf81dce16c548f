use async_trait::async_trait;
use serde::Deserialize;

use super::{GatewayError, GatewayRefund, PaymentGateway, VerifiedPayment};

/// Khalti wallet gateway. Verification checks a client-side token against
/// the expected amount; refunds run against the merchant transaction API.
pub struct KhaltiGateway {
    secret_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl KhaltiGateway {
    pub fn new(secret_key: String, base_url: String) -> Self {
        Self {
            secret_key,
            base_url,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct VerifyResponse {
    idx: String,
    amount: i64,
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    async fn verify_payment(
        &self,
        token: &str,
        amount_minor: i64,
    ) -> Result<VerifiedPayment, GatewayError> {
        let url = format!("{}/payment/verify/", self.base_url);
        let amount = amount_minor.to_string();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.secret_key))
            .form(&[("token", token), ("amount", amount.as_str())])
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            let detail = body
                .get("detail")
                .and_then(|v| v.as_str())
                .unwrap_or("payment verification rejected");
            return Err(GatewayError::Declined(detail.to_string()));
        }

        let verified: VerifyResponse = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::Unavailable(format!("unexpected verify payload: {e}")))?;

        if verified.amount != amount_minor {
            return Err(GatewayError::Declined(format!(
                "amount mismatch: expected {amount_minor}, gateway reports {}",
                verified.amount
            )));
        }

        Ok(VerifiedPayment {
            reference: verified.idx,
            raw_response: body,
        })
    }

    async fn initiate_refund(
        &self,
        original_reference: &str,
        amount_minor: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        let url = format!(
            "{}/merchant-transaction/{}/refund/",
            self.base_url, original_reference
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.secret_key))
            .form(&[("amount", &amount_minor.to_string())])
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            let detail = body
                .get("detail")
                .and_then(|v| v.as_str())
                .unwrap_or("refund rejected");
            return Err(GatewayError::Declined(detail.to_string()));
        }

        let refund_reference = body
            .get("idx")
            .and_then(|v| v.as_str())
            .unwrap_or(original_reference)
            .to_string();

        Ok(GatewayRefund {
            refund_reference,
            raw_response: body,
        })
    }
}
