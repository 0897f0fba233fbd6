use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, types::Json};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::payments::{
        CreatePaymentRequest, PaymentDetail, PaymentList, PaymentMethodCount, PaymentStatusCount,
        PaymentSummary, RefundRequest, VerifyPaymentRequest, WebhookEvent, WebhookPaymentEntity,
        WebhookRefundEntity,
    },
    error::{AppError, AppResult},
    gateway::{checkout_signature_payload, verify_signature},
    middleware::auth::{AuthUser, ensure_admin, ensure_owner_or_admin},
    models::{Address, Payment, PaymentMethod, PaymentState, RefundEntry},
    response::{ApiResponse, Meta},
    routes::params::PaymentListQuery,
    state::AppState,
};

/// Client metadata captured for the payment audit trail.
#[derive(Debug, Default, Clone)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    payment_number: String,
    order_id: Uuid,
    user_id: Uuid,
    amount: i64,
    currency: String,
    method: String,
    status: String,
    gateway_order_id: Option<String>,
    gateway_payment_id: Option<String>,
    amount_refunded: i64,
    failure_reason: Option<String>,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    description: Option<String>,
    initiated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

const PAYMENT_COLUMNS: &str = "id, payment_number, order_id, user_id, amount, currency, method, \
     status, gateway_order_id, gateway_payment_id, amount_refunded, failure_reason, \
     customer_email, customer_phone, description, initiated_at, completed_at, failed_at, \
     created_at";

#[derive(FromRow)]
struct RefundRow {
    id: Uuid,
    refund_number: String,
    gateway_refund_id: Option<String>,
    amount: i64,
    reason: String,
    status: String,
    processed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

fn parse_state(s: &str) -> AppResult<PaymentState> {
    s.parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))
}

fn payment_from_row(row: PaymentRow) -> AppResult<Payment> {
    let method: PaymentMethod = row
        .method
        .parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(Payment {
        id: row.id,
        payment_number: row.payment_number,
        order_id: row.order_id,
        user_id: row.user_id,
        amount: row.amount,
        currency: row.currency,
        method,
        status: parse_state(&row.status)?,
        gateway_order_id: row.gateway_order_id,
        gateway_payment_id: row.gateway_payment_id,
        amount_refunded: row.amount_refunded,
        failure_reason: row.failure_reason,
        customer_email: row.customer_email,
        customer_phone: row.customer_phone,
        description: row.description,
        initiated_at: row.initiated_at,
        completed_at: row.completed_at,
        failed_at: row.failed_at,
        created_at: row.created_at,
    })
}

fn refund_from_row(row: RefundRow) -> RefundEntry {
    RefundEntry {
        id: row.id,
        refund_number: row.refund_number,
        gateway_refund_id: row.gateway_refund_id,
        amount: row.amount,
        reason: row.reason,
        status: row.status,
        processed_by: row.processed_by,
        created_at: row.created_at,
    }
}

fn build_payment_number(payment_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = payment_id.to_string();
    format!("PAY-{}-{}", date, &suffix[..8])
}

fn build_refund_number(refund_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = refund_id.to_string();
    format!("RFD-{}-{}", date, &suffix[..8])
}

pub async fn initiate_payment(
    state: &AppState,
    user: &AuthUser,
    payload: CreatePaymentRequest,
    meta: RequestMeta,
) -> AppResult<ApiResponse<PaymentDetail>> {
    if payload.amount <= 0 {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    // Caller supplies major units; the record keeps minor units.
    let amount_minor = payload
        .amount
        .checked_mul(100)
        .ok_or_else(|| AppError::BadRequest("amount too large".into()))?;
    let currency = payload.currency.unwrap_or_else(|| "INR".to_string());

    let mut txn = state.pool.begin().await?;

    // The order row lock serializes payment creation per order, so two
    // concurrent initiations cannot both pass the duplicate check.
    let order: Option<(Uuid, Json<Address>)> = sqlx::query_as(
        "SELECT user_id, shipping_address FROM orders WHERE id = $1 AND is_deleted = FALSE FOR UPDATE",
    )
    .bind(payload.order_id)
    .fetch_optional(&mut *txn)
    .await?;
    let (owner_id, shipping_address) = order.ok_or(AppError::NotFound)?;
    ensure_owner_or_admin(user, owner_id)?;

    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT status FROM payments WHERE order_id = $1 \
         AND status IN ('pending', 'processing', 'completed') LIMIT 1",
    )
    .bind(payload.order_id)
    .fetch_optional(&mut *txn)
    .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest(
            "Payment already exists for this order".into(),
        ));
    }

    let payment_id = Uuid::new_v4();
    let payment_number = build_payment_number(payment_id);

    let gateway_order_id = if payload.method.is_cod() {
        None
    } else {
        let gw_order = state
            .gateway
            .create_order(amount_minor, &currency, &payment_number)
            .await
            .map_err(|e| AppError::Gateway(e.into()))?;
        Some(gw_order.id)
    };

    let customer_email = payload
        .customer_email
        .or_else(|| shipping_address.0.email.clone());
    let customer_phone = payload
        .customer_phone
        .or_else(|| Some(shipping_address.0.phone.clone()));

    let row: PaymentRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO payments (
            id, payment_number, order_id, user_id, amount, currency, method, status,
            gateway_order_id, customer_email, customer_phone, client_ip, user_agent, description
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11, $12, $13)
        RETURNING {PAYMENT_COLUMNS}
        "#
    ))
    .bind(payment_id)
    .bind(&payment_number)
    .bind(payload.order_id)
    .bind(user.user_id)
    .bind(amount_minor)
    .bind(&currency)
    .bind(payload.method.as_str())
    .bind(&gateway_order_id)
    .bind(&customer_email)
    .bind(&customer_phone)
    .bind(&meta.ip)
    .bind(&meta.user_agent)
    .bind(&payload.description)
    .fetch_one(&mut *txn)
    .await?;

    if payload.method.is_cod() {
        // No gateway round-trip for cash on delivery; the order only records
        // that collection is pending.
        sqlx::query(
            "UPDATE orders SET payment_method = 'cod', payment_status = 'pending', updated_at = now() WHERE id = $1",
        )
        .bind(payload.order_id)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_initiate",
        Some("payments"),
        Some(serde_json::json!({
            "payment_id": payment_id,
            "order_id": payload.order_id,
            "amount": amount_minor,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let payment = payment_from_row(row)?;
    let detail = load_detail(state, payment).await?;
    Ok(ApiResponse::created("Payment initiated", detail))
}

pub async fn verify_payment(
    state: &AppState,
    user: &AuthUser,
    payload: VerifyPaymentRequest,
) -> AppResult<ApiResponse<PaymentDetail>> {
    let gw_config = state
        .config
        .gateway
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Payment gateway is not configured".into()))?;

    let mut txn = state.pool.begin().await?;

    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_order_id = $1 FOR UPDATE"
    ))
    .bind(&payload.gateway_order_id)
    .fetch_optional(&mut *txn)
    .await?;
    let payment = payment_from_row(row.ok_or(AppError::NotFound)?)?;
    ensure_owner_or_admin(user, payment.user_id)?;

    let signed = checkout_signature_payload(&payload.gateway_order_id, &payload.gateway_payment_id);
    if !verify_signature(&gw_config.key_secret, signed.as_bytes(), &payload.signature) {
        // The failed state is persisted before surfacing the 400 so the
        // attempt is visible in the record.
        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed', failure_reason = 'signature verification failed',
                gateway_payment_id = $2, gateway_signature = $3, failed_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(&payload.gateway_payment_id)
        .bind(&payload.signature)
        .execute(&mut *txn)
        .await?;
        sqlx::query(
            "UPDATE orders SET payment_status = 'failed', updated_at = now() \
             WHERE id = $1 AND payment_status = 'pending'",
        )
        .bind(payment.order_id)
        .execute(&mut *txn)
        .await?;
        txn.commit().await?;
        return Err(AppError::BadRequest("Invalid payment signature".into()));
    }

    if payment.status == PaymentState::Completed {
        // Replayed verify call for an already-settled payment.
        txn.commit().await?;
        let detail = load_detail(state, payment).await?;
        return Ok(ApiResponse::success("Payment verified", detail, Some(Meta::empty())));
    }

    let gw_payment = state
        .gateway
        .fetch_payment(&payload.gateway_payment_id)
        .await
        .map_err(|e| AppError::Gateway(e.into()))?;

    let next = if gw_payment.status == "captured" {
        PaymentState::Completed
    } else {
        PaymentState::Processing
    };
    if !payment.status.can_transition_to(next) {
        return Err(AppError::BadRequest(format!(
            "Payment cannot move from {} to {}",
            payment.status.as_str(),
            next.as_str()
        )));
    }

    let row: PaymentRow = sqlx::query_as(&format!(
        r#"
        UPDATE payments
        SET status = $2, gateway_payment_id = $3, gateway_signature = $4,
            gateway_response = $5,
            completed_at = CASE WHEN $2 = 'completed' THEN now() ELSE completed_at END,
            updated_at = now()
        WHERE id = $1
        RETURNING {PAYMENT_COLUMNS}
        "#
    ))
    .bind(payment.id)
    .bind(next.as_str())
    .bind(&payload.gateway_payment_id)
    .bind(&payload.signature)
    .bind(Json(&gw_payment.raw))
    .fetch_one(&mut *txn)
    .await?;

    if next == PaymentState::Completed {
        sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = 'paid', payment_transaction_id = $2, paid_at = now(),
                updated_at = now()
            WHERE id = $1 AND payment_status IN ('pending', 'failed')
            "#,
        )
        .bind(payment.order_id)
        .bind(&payload.gateway_payment_id)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_verify",
        Some("payments"),
        Some(serde_json::json!({ "payment_id": payment.id, "status": next.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let payment = payment_from_row(row)?;
    let detail = load_detail(state, payment).await?;
    Ok(ApiResponse::success("Payment verified", detail, Some(Meta::empty())))
}

pub async fn handle_webhook(
    state: &AppState,
    signature: Option<&str>,
    body: &[u8],
) -> AppResult<ApiResponse<serde_json::Value>> {
    let gw_config = state
        .config
        .gateway
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Payment gateway is not configured".into()))?;

    let signature = signature.ok_or_else(|| {
        AppError::BadRequest("Missing webhook signature".into())
    })?;
    if !verify_signature(&gw_config.webhook_secret, body, signature) {
        return Err(AppError::BadRequest("Invalid webhook signature".into()));
    }

    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|_| AppError::BadRequest("Malformed webhook payload".into()))?;

    match event.event.as_str() {
        "payment.captured" => {
            if let Some(entity) = event.payload.payment {
                webhook_payment_captured(state, entity).await?;
            }
        }
        "payment.failed" => {
            if let Some(entity) = event.payload.payment {
                webhook_payment_failed(state, entity).await?;
            }
        }
        "refund.processed" => {
            if let Some(entity) = event.payload.refund {
                webhook_refund_processed(state, entity).await?;
            }
        }
        other => {
            tracing::info!(event = %other, "ignoring unhandled webhook event");
        }
    }

    Ok(ApiResponse::success(
        "OK",
        serde_json::json!({ "received": true }),
        Some(Meta::empty()),
    ))
}

async fn webhook_payment_captured(
    state: &AppState,
    entity: WebhookPaymentEntity,
) -> AppResult<()> {
    let mut txn = state.pool.begin().await?;

    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE gateway_payment_id = $1 OR gateway_order_id = $2 FOR UPDATE"
    ))
    .bind(&entity.id)
    .bind(&entity.order_id)
    .fetch_optional(&mut *txn)
    .await?;
    let Some(row) = row else {
        tracing::warn!(gateway_payment_id = %entity.id, "webhook for unknown payment");
        return Ok(());
    };
    let payment = payment_from_row(row)?;

    // Replays of the same capture event are no-ops.
    if payment.status == PaymentState::Completed {
        return Ok(());
    }
    if !payment.status.can_transition_to(PaymentState::Completed) {
        tracing::warn!(
            payment_id = %payment.id,
            status = payment.status.as_str(),
            "ignoring capture webhook for non-completable payment"
        );
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'completed', gateway_payment_id = $2, gateway_response = $3,
            completed_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(&entity.id)
    .bind(Json(&entity.extra))
    .execute(&mut *txn)
    .await?;

    sqlx::query(
        r#"
        UPDATE orders
        SET payment_status = 'paid', payment_transaction_id = $2, paid_at = now(),
            updated_at = now()
        WHERE id = $1 AND payment_status IN ('pending', 'failed')
        "#,
    )
    .bind(payment.order_id)
    .bind(&entity.id)
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok(())
}

async fn webhook_payment_failed(state: &AppState, entity: WebhookPaymentEntity) -> AppResult<()> {
    let mut txn = state.pool.begin().await?;

    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE gateway_payment_id = $1 OR gateway_order_id = $2 FOR UPDATE"
    ))
    .bind(&entity.id)
    .bind(&entity.order_id)
    .fetch_optional(&mut *txn)
    .await?;
    let Some(row) = row else {
        tracing::warn!(gateway_payment_id = %entity.id, "webhook for unknown payment");
        return Ok(());
    };
    let payment = payment_from_row(row)?;

    if !payment.status.can_transition_to(PaymentState::Failed) {
        return Ok(());
    }

    let reason = entity
        .error_description
        .unwrap_or_else(|| "payment failed at gateway".to_string());

    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'failed', failure_reason = $2, gateway_payment_id = $3,
            failed_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(&reason)
    .bind(&entity.id)
    .execute(&mut *txn)
    .await?;

    sqlx::query(
        "UPDATE orders SET payment_status = 'failed', updated_at = now() \
         WHERE id = $1 AND payment_status = 'pending'",
    )
    .bind(payment.order_id)
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok(())
}

async fn webhook_refund_processed(state: &AppState, entity: WebhookRefundEntity) -> AppResult<()> {
    let mut txn = state.pool.begin().await?;

    // A replayed refund event must not double-count: the gateway refund id
    // is recorded exactly once.
    let seen: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM payment_refunds WHERE gateway_refund_id = $1")
            .bind(&entity.id)
            .fetch_optional(&mut *txn)
            .await?;
    if seen.is_some() {
        return Ok(());
    }

    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_payment_id = $1 FOR UPDATE"
    ))
    .bind(&entity.payment_id)
    .fetch_optional(&mut *txn)
    .await?;
    let Some(row) = row else {
        tracing::warn!(gateway_payment_id = %entity.payment_id, "refund webhook for unknown payment");
        return Ok(());
    };
    let payment = payment_from_row(row)?;

    // Same gate as the admin refund path: a refund event for a payment that
    // never completed is out of order and must not move it to a refund state.
    if !payment.status.is_refundable() {
        tracing::warn!(
            payment_id = %payment.id,
            status = payment.status.as_str(),
            "refund webhook for payment not in a refundable state"
        );
        return Ok(());
    }

    let remaining = payment.amount - payment.amount_refunded;
    if entity.amount <= 0 || entity.amount > remaining {
        tracing::warn!(
            payment_id = %payment.id,
            amount = entity.amount,
            remaining,
            "refund webhook amount outside remaining balance"
        );
        return Ok(());
    }

    let refund_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO payment_refunds (id, payment_id, refund_number, gateway_refund_id, amount, reason, status)
        VALUES ($1, $2, $3, $4, $5, $6, 'processed')
        "#,
    )
    .bind(refund_id)
    .bind(payment.id)
    .bind(build_refund_number(refund_id))
    .bind(&entity.id)
    .bind(entity.amount)
    .bind(entity.notes.as_deref().unwrap_or("gateway refund"))
    .execute(&mut *txn)
    .await?;

    apply_refund_progress(&mut txn, &payment, entity.amount).await?;

    txn.commit().await?;
    Ok(())
}

pub async fn refund_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: RefundRequest,
) -> AppResult<ApiResponse<PaymentDetail>> {
    ensure_admin(user)?;

    let mut txn = state.pool.begin().await?;

    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *txn)
    .await?;
    let payment = payment_from_row(row.ok_or(AppError::NotFound)?)?;

    if !payment.status.is_refundable() {
        return Err(AppError::BadRequest(format!(
            "Payment in status {} cannot be refunded",
            payment.status.as_str()
        )));
    }

    let remaining = payment.amount - payment.amount_refunded;
    let amount = payload.amount.unwrap_or(remaining);
    if amount <= 0 || amount > remaining {
        return Err(AppError::BadRequest(
            "Refund amount exceeds the remaining balance".into(),
        ));
    }

    // COD payments have no gateway record; their refunds live only in the
    // local ledger.
    let gateway_refund_id = match payment.gateway_payment_id.as_deref() {
        Some(gw_payment_id) => {
            let gw_refund = state
                .gateway
                .create_refund(gw_payment_id, amount)
                .await
                .map_err(|e| AppError::Gateway(e.into()))?;
            Some(gw_refund.id)
        }
        None => None,
    };

    let refund_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO payment_refunds (id, payment_id, refund_number, gateway_refund_id, amount, reason, status, processed_by)
        VALUES ($1, $2, $3, $4, $5, $6, 'processed', $7)
        "#,
    )
    .bind(refund_id)
    .bind(payment.id)
    .bind(build_refund_number(refund_id))
    .bind(&gateway_refund_id)
    .bind(amount)
    .bind(&payload.reason)
    .bind(user.user_id)
    .execute(&mut *txn)
    .await?;

    let row = apply_refund_progress(&mut txn, &payment, amount).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_refund",
        Some("payments"),
        Some(serde_json::json!({ "payment_id": payment.id, "amount": amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let payment = payment_from_row(row)?;
    let detail = load_detail(state, payment).await?;
    Ok(ApiResponse::success("Refund processed", detail, Some(Meta::empty())))
}

/// Bump the refund accumulator and derive the payment status from it; a
/// fully-refunded payment marks its order refunded.
async fn apply_refund_progress(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment: &Payment,
    amount: i64,
) -> AppResult<PaymentRow> {
    let new_refunded = payment.amount_refunded + amount;
    let new_state = PaymentState::from_refund_progress(payment.amount, new_refunded);

    let row: PaymentRow = sqlx::query_as(&format!(
        r#"
        UPDATE payments
        SET amount_refunded = $2, status = $3, updated_at = now()
        WHERE id = $1
        RETURNING {PAYMENT_COLUMNS}
        "#
    ))
    .bind(payment.id)
    .bind(new_refunded)
    .bind(new_state.as_str())
    .fetch_one(&mut **txn)
    .await?;

    if new_state == PaymentState::Refunded {
        sqlx::query(
            "UPDATE orders SET payment_status = 'refunded', updated_at = now() \
             WHERE id = $1 AND payment_status = 'paid'",
        )
        .bind(payment.order_id)
        .execute(&mut **txn)
        .await?;
    }

    Ok(row)
}

pub async fn get_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<PaymentDetail>> {
    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;
    let payment = payment_from_row(row.ok_or(AppError::NotFound)?)?;
    ensure_owner_or_admin(user, payment.user_id)?;

    let detail = load_detail(state, payment).await?;
    Ok(ApiResponse::success("OK", detail, Some(Meta::empty())))
}

pub async fn list_my_payments(
    state: &AppState,
    user: &AuthUser,
    query: PaymentListQuery,
) -> AppResult<ApiResponse<PaymentList>> {
    list_payments_filtered(state, Some(user.user_id), query).await
}

pub async fn list_all_payments(
    state: &AppState,
    user: &AuthUser,
    query: PaymentListQuery,
) -> AppResult<ApiResponse<PaymentList>> {
    ensure_admin(user)?;
    list_payments_filtered(state, None, query).await
}

async fn list_payments_filtered(
    state: &AppState,
    user_id: Option<Uuid>,
    query: PaymentListQuery,
) -> AppResult<ApiResponse<PaymentList>> {
    let (page, limit, offset) = query.pagination.normalize();

    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        status
            .parse::<PaymentState>()
            .map_err(AppError::BadRequest)?;
    }
    if let Some(method) = query.method.as_ref().filter(|s| !s.is_empty()) {
        method
            .parse::<PaymentMethod>()
            .map_err(AppError::BadRequest)?;
    }

    let mut builder = QueryBuilder::new(format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE TRUE"
    ));
    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM payments WHERE TRUE");

    for b in [&mut builder, &mut count_builder] {
        if let Some(user_id) = user_id {
            b.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
            b.push(" AND status = ").push_bind(status.clone());
        }
        if let Some(method) = query.method.as_ref().filter(|s| !s.is_empty()) {
            b.push(" AND method = ").push_bind(method.clone());
        }
    }

    builder.push(" ORDER BY created_at DESC LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);

    let rows: Vec<PaymentRow> = builder.build_query_as().fetch_all(&state.pool).await?;
    let total: (i64,) = count_builder
        .build_query_as()
        .fetch_one(&state.pool)
        .await?;

    let items = rows
        .into_iter()
        .map(payment_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("OK", PaymentList { items }, Some(meta)))
}

pub async fn payment_summary(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<PaymentSummary>> {
    ensure_admin(user)?;

    let by_status_rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*), COALESCE(SUM(amount), 0) FROM payments GROUP BY status",
    )
    .fetch_all(&state.pool)
    .await?;

    let by_method_rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT method, COUNT(*), COALESCE(SUM(amount), 0) FROM payments GROUP BY method",
    )
    .fetch_all(&state.pool)
    .await?;

    let totals: (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(amount) FILTER (
                   WHERE status IN ('completed', 'refunded', 'partially_refunded')), 0),
               COALESCE(SUM(amount_refunded), 0)
        FROM payments
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let by_status = by_status_rows
        .into_iter()
        .map(|(status, count, amount)| {
            Ok(PaymentStatusCount {
                status: parse_state(&status)?,
                count,
                amount,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let by_method = by_method_rows
        .into_iter()
        .map(|(method, count, amount)| {
            Ok(PaymentMethodCount {
                method: method
                    .parse()
                    .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?,
                count,
                amount,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "OK",
        PaymentSummary {
            total_payments: totals.0,
            total_collected: totals.1,
            total_refunded: totals.2,
            by_status,
            by_method,
        },
        Some(Meta::empty()),
    ))
}

async fn load_detail(state: &AppState, payment: Payment) -> AppResult<PaymentDetail> {
    let refund_rows: Vec<RefundRow> = sqlx::query_as(
        "SELECT id, refund_number, gateway_refund_id, amount, reason, status, processed_by, created_at \
         FROM payment_refunds WHERE payment_id = $1 ORDER BY created_at",
    )
    .bind(payment.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(PaymentDetail {
        payment,
        refunds: refund_rows.into_iter().map(refund_from_row).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_number_carries_date_and_suffix() {
        let id = Uuid::new_v4();
        let number = build_payment_number(id);
        assert!(number.starts_with("PAY-"));
        assert_eq!(number.split('-').count(), 3);
        let refund = build_refund_number(id);
        assert!(refund.starts_with("RFD-"));
    }
}
