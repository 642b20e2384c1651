use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::OzonPayConfig,
    error::{AppError, AppResult},
    money,
};

/// Inbound webhook body. `amount` is in minor units (kopecks), as sent by
/// the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "transactionID")]
    pub transaction_id: String,
    #[serde(rename = "extOrderID")]
    pub ext_order_id: String,
    pub amount: i64,
    #[serde(rename = "currencyCode")]
    pub currency_code: String,
    pub status: String,
    #[serde(rename = "requestSign")]
    pub request_sign: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    #[serde(rename = "accessKey")]
    access_key: String,
    #[serde(rename = "extOrderID")]
    ext_order_id: String,
    amount: i64,
    #[serde(rename = "currencyCode")]
    currency_code: String,
    #[serde(rename = "successUrl")]
    success_url: String,
    #[serde(rename = "failUrl")]
    fail_url: String,
    #[serde(rename = "requestSign")]
    request_sign: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedOrder {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "paymentUrl")]
    pub payment_url: String,
    #[serde(default)]
    pub status: String,
}

impl CreatedOrder {
    /// A freshly created order reporting itself paid means misconfigured
    /// sandbox/production keys (or fraud); callers must treat it as a hard
    /// integration error, not success.
    pub fn is_paid(&self) -> bool {
        self.status == "Completed"
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusResponse {
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub status: String,
}

pub struct OzonPayClient {
    http: reqwest::Client,
    config: OzonPayConfig,
}

impl OzonPayClient {
    pub fn new(config: OzonPayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Register an order with the gateway and get the customer payment link.
    pub async fn create_order(&self, ext_order_id: &str, amount: &str) -> AppResult<CreatedOrder> {
        let amount = money::to_minor_units(money::parse_amount(amount)?);
        let request_sign = request_signature(
            &self.config.access_key,
            ext_order_id,
            amount,
            CURRENCY_RUB,
            &self.config.secret_key,
        );

        let body = CreateOrderRequest {
            access_key: self.config.access_key.clone(),
            ext_order_id: ext_order_id.to_string(),
            amount,
            currency_code: CURRENCY_RUB.to_string(),
            success_url: self.config.success_url.clone(),
            fail_url: self.config.fail_url.clone(),
            request_sign,
        };

        let response = self
            .http
            .post(format!("{}/createOrder", self.config.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::PaymentGateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::PaymentGateway(format!(
                "createOrder returned {}",
                response.status()
            )));
        }

        response
            .json::<CreatedOrder>()
            .await
            .map_err(|e| AppError::PaymentGateway(e.to_string()))
    }

    pub async fn get_order_status(&self, order_id: &str) -> AppResult<OrderStatusResponse> {
        let request_sign = status_signature(
            &self.config.access_key,
            order_id,
            &self.config.secret_key,
        );

        let response = self
            .http
            .post(format!("{}/getOrderStatus", self.config.api_url))
            .json(&serde_json::json!({
                "accessKey": self.config.access_key,
                "orderID": order_id,
                "requestSign": request_sign,
            }))
            .send()
            .await
            .map_err(|e| AppError::PaymentGateway(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::PaymentGateway(format!(
                "getOrderStatus returned {}",
                response.status()
            )));
        }

        response
            .json::<OrderStatusResponse>()
            .await
            .map_err(|e| AppError::PaymentGateway(e.to_string()))
    }

    /// Recompute the webhook signature with the notification secret and
    /// compare against `requestSign`.
    pub fn verify_webhook(&self, payload: &WebhookPayload) -> AppResult<()> {
        let expected = webhook_signature(payload, &self.config.notification_secret_key);
        if expected != payload.request_sign {
            return Err(AppError::InvalidWebhookSignature);
        }
        Ok(())
    }
}

const CURRENCY_RUB: &str = "RUB";

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Signature over the fixed pipe concatenation used by createOrder.
fn request_signature(
    access_key: &str,
    ext_order_id: &str,
    amount: i64,
    currency: &str,
    secret_key: &str,
) -> String {
    sha256_hex(&format!(
        "{}|{}|{}|{}|{}",
        access_key, ext_order_id, amount, currency, secret_key
    ))
}

fn status_signature(access_key: &str, order_id: &str, secret_key: &str) -> String {
    sha256_hex(&format!("{}|{}|{}", access_key, order_id, secret_key))
}

/// Webhook signature: the same scheme keyed by the notification secret.
pub fn webhook_signature(payload: &WebhookPayload, notification_secret: &str) -> String {
    sha256_hex(&format!(
        "{}|{}|{}|{}|{}|{}|{}",
        payload.order_id,
        payload.transaction_id,
        payload.ext_order_id,
        payload.amount,
        payload.currency_code,
        payload.status,
        notification_secret
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "notify-secret";

    fn signed_payload() -> WebhookPayload {
        let mut payload = WebhookPayload {
            order_id: "oz-1".into(),
            transaction_id: "tx-1".into(),
            ext_order_id: "11111111-2222-3333-4444-555555555555".into(),
            amount: 55000,
            currency_code: "RUB".into(),
            status: "Completed".into(),
            request_sign: String::new(),
        };
        payload.request_sign = webhook_signature(&payload, SECRET);
        payload
    }

    fn verify(payload: &WebhookPayload) -> bool {
        webhook_signature(payload, SECRET) == payload.request_sign
    }

    #[test]
    fn valid_signature_verifies() {
        assert!(verify(&signed_payload()));
    }

    #[test]
    fn any_single_field_mutation_is_rejected() {
        let mut p = signed_payload();
        p.order_id = "oz-2".into();
        assert!(!verify(&p));

        let mut p = signed_payload();
        p.transaction_id = "tx-2".into();
        assert!(!verify(&p));

        let mut p = signed_payload();
        p.ext_order_id = "11111111-2222-3333-4444-000000000000".into();
        assert!(!verify(&p));

        let mut p = signed_payload();
        p.amount = 1;
        assert!(!verify(&p));

        let mut p = signed_payload();
        p.currency_code = "USD".into();
        assert!(!verify(&p));

        let mut p = signed_payload();
        p.status = "Failed".into();
        assert!(!verify(&p));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = signed_payload();
        assert_ne!(webhook_signature(&payload, "other-secret"), payload.request_sign);
    }

    #[test]
    fn created_order_paid_flag() {
        let created = CreatedOrder {
            order_id: "oz-1".into(),
            payment_url: "https://pay".into(),
            status: "Completed".into(),
        };
        assert!(created.is_paid());

        let created = CreatedOrder {
            order_id: "oz-1".into(),
            payment_url: "https://pay".into(),
            status: String::new(),
        };
        assert!(!created.is_paid());
    }
}
