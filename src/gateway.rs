//! Payment gateway client.
//!
//! The service talks to the gateway through the [`PaymentGateway`] trait so
//! the concrete client is injected once at startup: [`HttpGateway`] for a
//! real deployment, [`StubGateway`] for development and tests.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

use crate::config::GatewayConfig;

type HmacSha256 = Hmac<Sha256>;

/// HTTP request timeout for a single gateway call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the gateway client layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("gateway API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Authoritative payment object as reported by the gateway. `raw` keeps the
/// full response for the stored snapshot.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub amount: i64,
    pub status: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub id: String,
    pub amount: i64,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a gateway-side order for the given amount in minor units.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError>;

    /// Fetch the authoritative payment object.
    async fn fetch_payment(&self, gateway_payment_id: &str)
    -> Result<GatewayPayment, GatewayError>;

    /// Execute a refund against a captured payment, amount in minor units.
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError>;
}

/// REST client for the hosted gateway, basic-auth with the key pair.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }

    async fn parse_json(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    fn payment_from_value(raw: Value) -> GatewayPayment {
        GatewayPayment {
            id: raw["id"].as_str().unwrap_or_default().to_string(),
            order_id: raw["order_id"].as_str().map(str::to_string),
            amount: raw["amount"].as_i64().unwrap_or(0),
            status: raw["status"].as_str().unwrap_or_default().to_string(),
            raw,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        let body = serde_json::json!({
            "amount": amount,
            "currency": currency,
            "receipt": receipt,
        });
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        let value = Self::parse_json(response).await?;
        Ok(serde_json::from_value(value).map_err(|e| GatewayError::Api {
            status: 200,
            body: format!("malformed order response: {e}"),
        })?)
    }

    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let response = self
            .client
            .get(format!("{}/payments/{}", self.base_url, gateway_payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;
        let value = Self::parse_json(response).await?;
        Ok(Self::payment_from_value(value))
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        let body = serde_json::json!({ "amount": amount });
        let response = self
            .client
            .post(format!(
                "{}/payments/{}/refund",
                self.base_url, gateway_payment_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        let value = Self::parse_json(response).await?;
        Ok(GatewayRefund {
            id: value["id"].as_str().unwrap_or_default().to_string(),
            amount: value["amount"].as_i64().unwrap_or(amount),
            status: value["status"].as_str().unwrap_or("processed").to_string(),
        })
    }
}

/// In-process gateway that acknowledges everything. Used when no gateway
/// credentials are configured and by the integration tests.
pub struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        Ok(GatewayOrder {
            id: format!("order_stub_{}", short_id()),
            amount,
            currency: currency.to_string(),
        })
    }

    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let raw = serde_json::json!({
            "id": gateway_payment_id,
            "status": "captured",
            "stub": true,
        });
        Ok(HttpGateway::payment_from_value(raw))
    }

    async fn create_refund(
        &self,
        _gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        Ok(GatewayRefund {
            id: format!("rfnd_stub_{}", short_id()),
            amount,
            status: "processed".to_string(),
        })
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// Hex-encoded HMAC-SHA256 over `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex-encoded HMAC-SHA256 signature.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Message signed by the gateway on the synchronous verify path.
pub fn checkout_signature_payload(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{gateway_order_id}|{gateway_payment_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let payload = checkout_signature_payload("order_abc", "pay_def");
        let sig = sign_payload("secret123", payload.as_bytes());
        assert!(verify_signature("secret123", payload.as_bytes(), &sig));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let payload = checkout_signature_payload("order_abc", "pay_def");
        let mut sig = sign_payload("secret123", payload.as_bytes());
        sig.replace_range(0..1, if sig.starts_with('0') { "1" } else { "0" });
        assert!(!verify_signature("secret123", payload.as_bytes(), &sig));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"{\"event\":\"payment.captured\"}";
        let sig = sign_payload("secret123", payload);
        assert!(!verify_signature("other-secret", payload, &sig));
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        assert!(!verify_signature("secret123", b"payload", "not hex at all"));
    }
}
