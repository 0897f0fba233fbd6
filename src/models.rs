use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
    OutOfStock,
    Discontinued,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::OutOfStock => "out_of_stock",
            ProductStatus::Discontinued => "discontinued",
        }
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            "out_of_stock" => Ok(ProductStatus::OutOfStock),
            "discontinued" => Ok(ProductStatus::Discontinued),
            other => Err(format!("unknown product status: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub status: ProductStatus,
    pub colors: Vec<String>,
    pub sizes: Vec<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Postal address snapshot embedded in orders (jsonb column).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Returned
        )
    }

    /// Allowed-transition table. Delivered is terminal for every purpose
    /// except a return.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending => matches!(next, Confirmed | Processing | Shipped | Cancelled),
            Confirmed => matches!(next, Processing | Shipped | Cancelled),
            Processing => matches!(next, Shipped | Cancelled),
            Shipped => matches!(next, Delivered | Cancelled),
            Delivered => matches!(next, Returned),
            Cancelled | Returned => false,
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "returned" => Ok(OrderStatus::Returned),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Payment state as seen from the order (the order's own summary field,
/// distinct from the payment record's lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl OrderPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPaymentStatus::Pending => "pending",
            OrderPaymentStatus::Paid => "paid",
            OrderPaymentStatus::Failed => "failed",
            OrderPaymentStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: OrderPaymentStatus) -> bool {
        use OrderPaymentStatus::*;
        match self {
            Pending => matches!(next, Paid | Failed),
            // A failed attempt may be retried and succeed.
            Failed => matches!(next, Paid),
            Paid => matches!(next, Refunded),
            Refunded => false,
        }
    }
}

impl std::str::FromStr for OrderPaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderPaymentStatus::Pending),
            "paid" => Ok(OrderPaymentStatus::Paid),
            "failed" => Ok(OrderPaymentStatus::Failed),
            "refunded" => Ok(OrderPaymentStatus::Refunded),
            other => Err(format!("unknown order payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Upi,
    Netbanking,
    Wallet,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Netbanking => "netbanking",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Cod => "cod",
        }
    }

    /// Cash on delivery needs no gateway round-trip at initiation.
    pub fn is_cod(&self) -> bool {
        matches!(self, PaymentMethod::Cod)
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            "netbanking" => Ok(PaymentMethod::Netbanking),
            "wallet" => Ok(PaymentMethod::Wallet),
            "cod" => Ok(PaymentMethod::Cod),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Processing => "processing",
            PaymentState::Completed => "completed",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
            PaymentState::Refunded => "refunded",
            PaymentState::PartiallyRefunded => "partially_refunded",
        }
    }

    /// A payment in one of these states blocks a new payment for the same
    /// order.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PaymentState::Pending | PaymentState::Processing | PaymentState::Completed
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentState::Completed | PaymentState::PartiallyRefunded
        )
    }

    /// Allowed-transition table. The synchronous verify path may complete a
    /// pending payment directly, so Pending -> Completed is legal.
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        use PaymentState::*;
        match self {
            Pending => matches!(next, Processing | Completed | Failed | Cancelled),
            Processing => matches!(next, Completed | Failed),
            Completed => matches!(next, Refunded | PartiallyRefunded),
            PartiallyRefunded => matches!(next, Refunded | PartiallyRefunded),
            Failed | Cancelled | Refunded => false,
        }
    }

    /// Status derived from the refund accumulator, per the model invariant:
    /// refunded iff everything came back, partially_refunded iff some did.
    pub fn from_refund_progress(amount: i64, amount_refunded: i64) -> PaymentState {
        if amount_refunded >= amount {
            PaymentState::Refunded
        } else if amount_refunded > 0 {
            PaymentState::PartiallyRefunded
        } else {
            PaymentState::Completed
        }
    }
}

impl std::str::FromStr for PaymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentState::Pending),
            "processing" => Ok(PaymentState::Processing),
            "completed" => Ok(PaymentState::Completed),
            "failed" => Ok(PaymentState::Failed),
            "cancelled" => Ok(PaymentState::Cancelled),
            "refunded" => Ok(PaymentState::Refunded),
            "partially_refunded" => Ok(PaymentState::PartiallyRefunded),
            other => Err(format!("unknown payment state: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub discount: i64,
    pub total_amount: i64,
    pub shipping_method: String,
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    pub payment_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub return_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Item snapshot frozen at checkout; decoupled from live product data.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub color: Option<String>,
    pub size: Option<String>,
    pub subtotal: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub note: Option<String>,
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub payment_number: String,
    pub order_id: Uuid,
    pub user_id: Uuid,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentState,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub amount_refunded: i64,
    pub failure_reason: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub description: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefundEntry {
    pub id: Uuid,
    pub refund_number: String,
    pub gateway_refund_id: Option<String>,
    pub amount: i64,
    pub reason: String,
    pub status: String,
    pub processed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_order_statuses_accept_nothing_but_return() {
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Returned.can_transition_to(OrderStatus::Pending));
        assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn shipped_orders_cannot_be_returned() {
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Returned));
    }

    #[test]
    fn pending_to_delivered_requires_shipping() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Delivered));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn payment_state_refund_reachability() {
        assert!(PaymentState::Completed.can_transition_to(PaymentState::PartiallyRefunded));
        assert!(PaymentState::PartiallyRefunded.can_transition_to(PaymentState::Refunded));
        assert!(!PaymentState::Refunded.can_transition_to(PaymentState::Completed));
        assert!(!PaymentState::Failed.can_transition_to(PaymentState::Completed));
    }

    #[test]
    fn refund_progress_derives_status() {
        assert_eq!(
            PaymentState::from_refund_progress(1000, 1000),
            PaymentState::Refunded
        );
        assert_eq!(
            PaymentState::from_refund_progress(1000, 400),
            PaymentState::PartiallyRefunded
        );
        assert_eq!(
            PaymentState::from_refund_progress(1000, 0),
            PaymentState::Completed
        );
    }

    #[test]
    fn active_payment_states_block_new_payments() {
        assert!(PaymentState::Pending.is_active());
        assert!(PaymentState::Processing.is_active());
        assert!(PaymentState::Completed.is_active());
        assert!(!PaymentState::Refunded.is_active());
        assert!(!PaymentState::Failed.is_active());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            "pending",
            "confirmed",
            "processing",
            "shipped",
            "delivered",
            "cancelled",
            "returned",
        ] {
            let parsed: OrderStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        for s in [
            "pending",
            "processing",
            "completed",
            "failed",
            "cancelled",
            "refunded",
            "partially_refunded",
        ] {
            let parsed: PaymentState = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }
}
