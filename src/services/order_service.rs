use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, types::Json};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{
        CancelOrderRequest, CreateOrderRequest, OrderDetail, OrderList, OrderStatusCount,
        OrderSummary, ReturnOrderRequest, UpdateOrderPaymentRequest, UpdateOrderStatusRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, ensure_owner_or_admin},
    models::{Address, Order, OrderItem, OrderPaymentStatus, OrderStatus, StatusHistoryEntry},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

const SHIPPING_EXPRESS: i64 = 100;
const SHIPPING_STANDARD: i64 = 50;
const TAX_PERCENT: i64 = 5;
const COUPON_CODE: &str = "SAVE10";
const COUPON_PERCENT: i64 = 10;

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    status: String,
    payment_status: String,
    subtotal: i64,
    shipping_cost: i64,
    tax: i64,
    discount: i64,
    total_amount: i64,
    shipping_method: String,
    coupon_code: Option<String>,
    shipping_address: Json<Address>,
    billing_address: Option<Json<Address>>,
    payment_method: String,
    payment_transaction_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    tracking_number: Option<String>,
    notes: Option<String>,
    cancel_reason: Option<String>,
    return_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, status, payment_status, subtotal, \
     shipping_cost, tax, discount, total_amount, shipping_method, coupon_code, \
     shipping_address, billing_address, payment_method, payment_transaction_id, paid_at, \
     tracking_number, notes, cancel_reason, return_reason, created_at, updated_at";

#[derive(FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    name: String,
    price: i64,
    quantity: i32,
    color: Option<String>,
    size: Option<String>,
    subtotal: i64,
}

#[derive(FromRow)]
struct HistoryRow {
    status: String,
    note: Option<String>,
    changed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

fn parse_status(s: &str) -> AppResult<OrderStatus> {
    s.parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))
}

fn parse_payment_status(s: &str) -> AppResult<OrderPaymentStatus> {
    s.parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))
}

fn order_from_row(row: OrderRow) -> AppResult<Order> {
    Ok(Order {
        id: row.id,
        order_number: row.order_number,
        user_id: row.user_id,
        status: parse_status(&row.status)?,
        payment_status: parse_payment_status(&row.payment_status)?,
        subtotal: row.subtotal,
        shipping_cost: row.shipping_cost,
        tax: row.tax,
        discount: row.discount,
        total_amount: row.total_amount,
        shipping_method: row.shipping_method,
        coupon_code: row.coupon_code,
        shipping_address: row.shipping_address.0,
        billing_address: row.billing_address.map(|j| j.0),
        payment_method: row
            .payment_method
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?,
        payment_transaction_id: row.payment_transaction_id,
        paid_at: row.paid_at,
        tracking_number: row.tracking_number,
        notes: row.notes,
        cancel_reason: row.cancel_reason,
        return_reason: row.return_reason,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn order_item_from_row(row: OrderItemRow) -> OrderItem {
    OrderItem {
        id: row.id,
        order_id: row.order_id,
        product_id: row.product_id,
        name: row.name,
        price: row.price,
        quantity: row.quantity,
        color: row.color,
        size: row.size,
        subtotal: row.subtotal,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct OrderTotals {
    subtotal: i64,
    shipping_cost: i64,
    tax: i64,
    discount: i64,
    total_amount: i64,
}

/// Pricing rules: flat shipping lookup by method name, 5% tax on the
/// subtotal, 10% discount for the one recognized coupon code. Unknown
/// coupon codes are ignored, not rejected.
fn compute_totals(subtotal: i64, shipping_method: &str, coupon_code: Option<&str>) -> OrderTotals {
    let shipping_cost = if shipping_method == "express" {
        SHIPPING_EXPRESS
    } else {
        SHIPPING_STANDARD
    };
    let tax = subtotal * TAX_PERCENT / 100;
    let discount = match coupon_code {
        Some(code) if code == COUPON_CODE => subtotal * COUPON_PERCENT / 100,
        _ => 0,
    };
    OrderTotals {
        subtotal,
        shipping_cost,
        tax,
        discount,
        total_amount: subtotal + shipping_cost + tax - discount,
    }
}

fn build_order_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.to_string();
    format!("ORD-{}-{}", date, &suffix[..8])
}

#[derive(FromRow)]
struct ProductForOrderRow {
    name: String,
    price: i64,
    stock: i32,
    status: String,
    colors: Vec<String>,
    sizes: Vec<String>,
    is_deleted: bool,
}

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest(
            "Order must contain at least one item".into(),
        ));
    }
    for item in &payload.items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "Invalid quantity for product {}",
                item.product_id
            )));
        }
    }

    let mut txn = state.pool.begin().await?;

    struct Snapshot {
        product_id: Uuid,
        name: String,
        price: i64,
        quantity: i32,
        color: Option<String>,
        size: Option<String>,
        subtotal: i64,
    }

    let mut snapshots: Vec<Snapshot> = Vec::with_capacity(payload.items.len());
    let mut subtotal: i64 = 0;

    // Every product row is locked before any stock write, so a validation
    // failure on a later item rolls back decrements already applied to
    // earlier ones.
    for item in &payload.items {
        let product: Option<ProductForOrderRow> = sqlx::query_as(
            "SELECT name, price, stock, status, colors, sizes, is_deleted \
             FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(item.product_id)
        .fetch_optional(&mut *txn)
        .await?;

        let product = product.filter(|p| !p.is_deleted).ok_or_else(|| {
            AppError::BadRequest(format!("Product {} not found", item.product_id))
        })?;

        if product.status != "active" {
            return Err(AppError::BadRequest(format!(
                "Product {} is not available",
                product.name
            )));
        }
        if product.stock < item.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {}",
                product.name
            )));
        }
        if let Some(color) = item.color.as_ref()
            && !product.colors.contains(color)
        {
            return Err(AppError::BadRequest(format!(
                "Color {} is not available for {}",
                color, product.name
            )));
        }
        if let Some(size) = item.size.as_ref()
            && !product.sizes.contains(size)
        {
            return Err(AppError::BadRequest(format!(
                "Size {} is not available for {}",
                size, product.name
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - $2,
                status = CASE WHEN stock - $2 = 0 THEN 'out_of_stock' ELSE status END,
                updated_at = now()
            WHERE id = $1 AND stock >= $2
            "#,
        )
        .bind(item.product_id)
        .bind(item.quantity)
        .execute(&mut *txn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {}",
                product.name
            )));
        }

        let line_subtotal = product.price * item.quantity as i64;
        subtotal += line_subtotal;
        snapshots.push(Snapshot {
            product_id: item.product_id,
            name: product.name,
            price: product.price,
            quantity: item.quantity,
            color: item.color.clone(),
            size: item.size.clone(),
            subtotal: line_subtotal,
        });
    }

    let totals = compute_totals(
        subtotal,
        &payload.shipping_method,
        payload.coupon_code.as_deref(),
    );

    let order_id = Uuid::new_v4();
    let order_number = build_order_number(order_id);

    let order_row: OrderRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO orders (
            id, order_number, user_id, status, payment_status, subtotal, shipping_cost,
            tax, discount, total_amount, shipping_method, coupon_code, shipping_address,
            billing_address, payment_method, notes
        )
        VALUES ($1, $2, $3, 'pending', 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(order_id)
    .bind(&order_number)
    .bind(user.user_id)
    .bind(totals.subtotal)
    .bind(totals.shipping_cost)
    .bind(totals.tax)
    .bind(totals.discount)
    .bind(totals.total_amount)
    .bind(&payload.shipping_method)
    .bind(&payload.coupon_code)
    .bind(Json(&payload.shipping_address))
    .bind(payload.billing_address.as_ref().map(Json))
    .bind(payload.payment_method.as_str())
    .bind(&payload.notes)
    .fetch_one(&mut *txn)
    .await?;

    for snapshot in &snapshots {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, name, price, quantity, color, size, subtotal)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order_id)
        .bind(snapshot.product_id)
        .bind(&snapshot.name)
        .bind(snapshot.price)
        .bind(snapshot.quantity)
        .bind(&snapshot.color)
        .bind(&snapshot.size)
        .bind(snapshot.subtotal)
        .execute(&mut *txn)
        .await?;
    }

    append_history(
        &mut txn,
        order_id,
        OrderStatus::Pending,
        Some("Order created"),
        Some(user.user_id),
    )
    .await?;

    txn.commit().await?;

    // Clearing the cart must never fail the order; failures go to the log
    // and the audit trail.
    if let Err(err) = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await
    {
        tracing::warn!(error = %err, order_id = %order_id, "cart clear after checkout failed");
        if let Err(err) = log_audit(
            &state.pool,
            Some(user.user_id),
            "cart_clear_failed",
            Some("cart_items"),
            Some(serde_json::json!({ "order_id": order_id })),
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id, "total": totals.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let order = order_from_row(order_row)?;
    let detail = load_detail(state, order).await?;
    Ok(ApiResponse::created("Order created", detail))
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    list_orders_filtered(state, Some(user.user_id), query).await
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    list_orders_filtered(state, None, query).await
}

async fn list_orders_filtered(
    state: &AppState,
    user_id: Option<Uuid>,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();

    // Filter values are validated up front so a typo returns 400 instead of
    // an empty page.
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        status
            .parse::<OrderStatus>()
            .map_err(AppError::BadRequest)?;
    }
    if let Some(ps) = query.payment_status.as_ref().filter(|s| !s.is_empty()) {
        ps.parse::<OrderPaymentStatus>()
            .map_err(AppError::BadRequest)?;
    }

    let mut builder = QueryBuilder::new(format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE is_deleted = FALSE"
    ));
    let mut count_builder =
        QueryBuilder::new("SELECT COUNT(*) FROM orders WHERE is_deleted = FALSE");

    for b in [&mut builder, &mut count_builder] {
        if let Some(user_id) = user_id {
            b.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
            b.push(" AND status = ").push_bind(status.clone());
        }
        if let Some(ps) = query.payment_status.as_ref().filter(|s| !s.is_empty()) {
            b.push(" AND payment_status = ").push_bind(ps.clone());
        }
        if let Some(from) = query.from {
            b.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            b.push(" AND created_at <= ").push_bind(to);
        }
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    builder.push(format!(" ORDER BY created_at {} LIMIT ", sort_order.as_sql()));
    builder.push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);

    let rows: Vec<OrderRow> = builder.build_query_as().fetch_all(&state.pool).await?;
    let total: (i64,) = count_builder
        .build_query_as()
        .fetch_one(&state.pool)
        .await?;

    let items = rows
        .into_iter()
        .map(order_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("OK", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND is_deleted = FALSE"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    let order = order_from_row(row.ok_or(AppError::NotFound)?)?;
    ensure_owner_or_admin(user, order.user_id)?;

    let detail = load_detail(state, order).await?;
    Ok(ApiResponse::success("OK", detail, Some(Meta::empty())))
}

pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    ensure_admin(user)?;

    let mut txn = state.pool.begin().await?;

    let current: Option<(String,)> = sqlx::query_as(
        "SELECT status FROM orders WHERE id = $1 AND is_deleted = FALSE FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *txn)
    .await?;
    let current = parse_status(&current.ok_or(AppError::NotFound)?.0)?;

    if !current.can_transition_to(payload.status) {
        return Err(AppError::BadRequest(format!(
            "Cannot change order status from {} to {}",
            current.as_str(),
            payload.status.as_str()
        )));
    }

    let row: OrderRow = sqlx::query_as(&format!(
        r#"
        UPDATE orders
        SET status = $2, tracking_number = COALESCE($3, tracking_number), updated_at = now()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(payload.status.as_str())
    .bind(&payload.tracking_number)
    .fetch_one(&mut *txn)
    .await?;

    append_history(
        &mut txn,
        id,
        payload.status,
        payload.note.as_deref(),
        Some(user.user_id),
    )
    .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id, "status": payload.status.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let order = order_from_row(row)?;
    let detail = load_detail(state, order).await?;
    Ok(ApiResponse::success("Order updated", detail, Some(Meta::empty())))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    let mut txn = state.pool.begin().await?;

    let current: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT user_id, status FROM orders WHERE id = $1 AND is_deleted = FALSE FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *txn)
    .await?;
    let (owner_id, status) = current.ok_or(AppError::NotFound)?;
    ensure_owner_or_admin(user, owner_id)?;

    let current = parse_status(&status)?;
    if current.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "Order cannot be cancelled from status {}",
            current.as_str()
        )));
    }

    let row: OrderRow = sqlx::query_as(&format!(
        r#"
        UPDATE orders
        SET status = 'cancelled', cancel_reason = $2, updated_at = now()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&payload.reason)
    .fetch_one(&mut *txn)
    .await?;

    // Put the purchased quantities back. Products deleted since the order
    // was placed are skipped.
    let items: Vec<(Uuid, i32)> =
        sqlx::query_as("SELECT product_id, quantity FROM order_items WHERE order_id = $1")
            .bind(id)
            .fetch_all(&mut *txn)
            .await?;
    for (product_id, quantity) in items {
        sqlx::query(
            r#"
            UPDATE products
            SET stock = stock + $2,
                status = CASE WHEN status = 'out_of_stock' THEN 'active' ELSE status END,
                updated_at = now()
            WHERE id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *txn)
        .await?;
    }

    append_history(
        &mut txn,
        id,
        OrderStatus::Cancelled,
        Some(&payload.reason),
        Some(user.user_id),
    )
    .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let order = order_from_row(row)?;
    let detail = load_detail(state, order).await?;
    Ok(ApiResponse::success("Order cancelled", detail, Some(Meta::empty())))
}

pub async fn return_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: ReturnOrderRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    let mut txn = state.pool.begin().await?;

    let current: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT user_id, status FROM orders WHERE id = $1 AND is_deleted = FALSE FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *txn)
    .await?;
    let (owner_id, status) = current.ok_or(AppError::NotFound)?;
    ensure_owner_or_admin(user, owner_id)?;

    let current = parse_status(&status)?;
    if current != OrderStatus::Delivered {
        return Err(AppError::BadRequest(
            "Only delivered orders can be returned".into(),
        ));
    }

    // Returned stock is not restored automatically; restocking returned
    // goods is a manual inventory action.
    let row: OrderRow = sqlx::query_as(&format!(
        r#"
        UPDATE orders
        SET status = 'returned', return_reason = $2, updated_at = now()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&payload.reason)
    .fetch_one(&mut *txn)
    .await?;

    append_history(
        &mut txn,
        id,
        OrderStatus::Returned,
        Some(&payload.reason),
        Some(user.user_id),
    )
    .await?;

    txn.commit().await?;

    let order = order_from_row(row)?;
    let detail = load_detail(state, order).await?;
    Ok(ApiResponse::success("Order returned", detail, Some(Meta::empty())))
}

pub async fn update_payment_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderPaymentRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    ensure_admin(user)?;

    let mut txn = state.pool.begin().await?;

    let current: Option<(String,)> = sqlx::query_as(
        "SELECT payment_status FROM orders WHERE id = $1 AND is_deleted = FALSE FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *txn)
    .await?;
    let current = parse_payment_status(&current.ok_or(AppError::NotFound)?.0)?;

    if !current.can_transition_to(payload.payment_status) {
        return Err(AppError::BadRequest(format!(
            "Cannot change payment status from {} to {}",
            current.as_str(),
            payload.payment_status.as_str()
        )));
    }

    let paid_at = if payload.payment_status == OrderPaymentStatus::Paid {
        Some(payload.payment_date.unwrap_or_else(Utc::now))
    } else {
        None
    };

    let row: OrderRow = sqlx::query_as(&format!(
        r#"
        UPDATE orders
        SET payment_status = $2,
            payment_transaction_id = COALESCE($3, payment_transaction_id),
            paid_at = COALESCE($4, paid_at),
            updated_at = now()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(payload.payment_status.as_str())
    .bind(&payload.transaction_id)
    .bind(paid_at)
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_payment_update",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": id,
            "payment_status": payload.payment_status.as_str(),
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let order = order_from_row(row)?;
    let detail = load_detail(state, order).await?;
    Ok(ApiResponse::success("Payment status updated", detail, Some(Meta::empty())))
}

pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let result = sqlx::query(
        "UPDATE orders SET is_deleted = TRUE, updated_at = now() WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(ApiResponse::success(
        "Order deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn order_summary(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderSummary>> {
    ensure_admin(user)?;

    let counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM orders WHERE is_deleted = FALSE GROUP BY status",
    )
    .fetch_all(&state.pool)
    .await?;

    let totals: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(total_amount) FILTER (WHERE payment_status = 'paid'), 0)
        FROM orders
        WHERE is_deleted = FALSE
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let by_status = counts
        .into_iter()
        .map(|(status, count)| {
            Ok(OrderStatusCount {
                status: parse_status(&status)?,
                count,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "OK",
        OrderSummary {
            total_orders: totals.0,
            by_status,
            revenue: totals.1,
        },
        Some(Meta::empty()),
    ))
}

async fn append_history(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
    status: OrderStatus,
    note: Option<&str>,
    changed_by: Option<Uuid>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO order_status_history (order_id, status, note, changed_by) VALUES ($1, $2, $3, $4)",
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(note)
    .bind(changed_by)
    .execute(&mut **txn)
    .await?;
    Ok(())
}

async fn load_detail(state: &AppState, order: Order) -> AppResult<OrderDetail> {
    let item_rows: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT id, order_id, product_id, name, price, quantity, color, size, subtotal \
         FROM order_items WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(order.id)
    .fetch_all(&state.pool)
    .await?;

    let history_rows: Vec<HistoryRow> = sqlx::query_as(
        "SELECT status, note, changed_by, created_at \
         FROM order_status_history WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(order.id)
    .fetch_all(&state.pool)
    .await?;

    let status_history = history_rows
        .into_iter()
        .map(|row| {
            Ok(StatusHistoryEntry {
                status: parse_status(&row.status)?,
                note: row.note,
                changed_by: row.changed_by,
                created_at: row.created_at,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(OrderDetail {
        order,
        items: item_rows.into_iter().map(order_item_from_row).collect(),
        status_history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_with_coupon_and_standard_shipping() {
        // 2 units at 100 with SAVE10: subtotal 200, discount 20, tax 10,
        // shipping 50, total 240.
        let totals = compute_totals(200, "standard", Some("SAVE10"));
        assert_eq!(
            totals,
            OrderTotals {
                subtotal: 200,
                shipping_cost: 50,
                tax: 10,
                discount: 20,
                total_amount: 240,
            }
        );
    }

    #[test]
    fn express_shipping_costs_more() {
        let totals = compute_totals(1000, "express", None);
        assert_eq!(totals.shipping_cost, 100);
        assert_eq!(totals.total_amount, 1000 + 100 + 50);
    }

    #[test]
    fn unknown_coupon_codes_are_ignored() {
        let totals = compute_totals(1000, "standard", Some("SAVE99"));
        assert_eq!(totals.discount, 0);
        let totals = compute_totals(1000, "standard", None);
        assert_eq!(totals.discount, 0);
    }

    #[test]
    fn order_number_carries_date_and_suffix() {
        let id = Uuid::new_v4();
        let number = build_order_number(id);
        assert!(number.starts_with("ORD-"));
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2], &id.to_string()[..8]);
    }
}
