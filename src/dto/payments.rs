use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Payment, PaymentMethod, PaymentState, RefundEntry};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    /// Major currency units; stored internally as minor units (x100).
    pub amount: i64,
    pub currency: Option<String>,
    pub method: PaymentMethod,
    pub description: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundRequest {
    /// Minor units; defaults to the remaining unrefunded balance.
    pub amount: Option<i64>,
    pub reason: String,
}

/// Gateway webhook envelope: event name plus a payload whose shape depends
/// on the event. Decoded once here, never re-parsed downstream.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<WebhookPaymentEntity>,
    pub refund: Option<WebhookRefundEntity>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    pub status: Option<String>,
    pub error_description: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRefundEntity {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    pub payment: Payment,
    pub refunds: Vec<RefundEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentList {
    pub items: Vec<Payment>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusCount {
    pub status: PaymentState,
    pub count: i64,
    pub amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodCount {
    pub method: PaymentMethod,
    pub count: i64,
    pub amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub total_payments: i64,
    pub total_collected: i64,
    pub total_refunded: i64,
    pub by_status: Vec<PaymentStatusCount>,
    pub by_method: Vec<PaymentMethodCount>,
}
