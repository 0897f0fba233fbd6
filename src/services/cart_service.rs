use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Product, ProductStatus},
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    quantity: i32,
    cart_price: i64,
    cart_color: Option<String>,
    cart_size: Option<String>,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    stock: i32,
    status: String,
    colors: Vec<String>,
    sizes: Vec<String>,
    category: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub async fn list_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.quantity, ci.price AS cart_price,
               ci.color AS cart_color, ci.size AS cart_size,
               p.id AS product_id, p.name, p.description, p.price, p.stock,
               p.status, p.colors, p.sizes, p.category, p.created_at, p.updated_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    let mut total_items: i64 = 0;
    let mut total_price: i64 = 0;
    for row in rows {
        let status: ProductStatus = row
            .status
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
        total_items += row.quantity as i64;
        total_price += row.cart_price * row.quantity as i64;
        items.push(CartItemDto {
            id: row.cart_id,
            product: Product {
                id: row.product_id,
                name: row.name,
                description: row.description,
                price: row.price,
                stock: row.stock,
                status,
                colors: row.colors,
                sizes: row.sizes,
                category: row.category,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            quantity: row.quantity,
            price: row.cart_price,
            color: row.cart_color,
            size: row.cart_size,
        });
    }

    Ok(ApiResponse::success(
        "OK",
        CartView {
            items,
            total_items,
            total_price,
        },
        Some(Meta::empty()),
    ))
}

pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartView>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest(
            "quantity must be at least 1".to_string(),
        ));
    }

    let product: Option<(i64, String, bool)> =
        sqlx::query_as("SELECT price, status, is_deleted FROM products WHERE id = $1")
            .bind(payload.product_id)
            .fetch_optional(pool)
            .await?;
    let (price, status, is_deleted) = product.ok_or(AppError::NotFound)?;
    if is_deleted || status != "active" {
        return Err(AppError::BadRequest("Product is not available".to_string()));
    }

    // Same product + variant replaces the quantity; a new variant is a new
    // line item.
    let existing: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM cart_items
        WHERE user_id = $1 AND product_id = $2
          AND color IS NOT DISTINCT FROM $3 AND size IS NOT DISTINCT FROM $4
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(&payload.color)
    .bind(&payload.size)
    .fetch_optional(pool)
    .await?;

    if let Some((item_id,)) = existing {
        sqlx::query("UPDATE cart_items SET quantity = $2, price = $3 WHERE id = $1")
            .bind(item_id)
            .bind(payload.quantity)
            .bind(price)
            .execute(pool)
            .await?;
    } else {
        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, product_id, quantity, price, color, size)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.user_id)
        .bind(payload.product_id)
        .bind(payload.quantity)
        .bind(price)
        .bind(&payload.color)
        .bind(&payload.size)
        .execute(pool)
        .await?;
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({
            "product_id": payload.product_id,
            "quantity": payload.quantity,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    list_cart(pool, user).await
}

pub async fn update_cart_item(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartView>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest(
            "quantity must be at least 1".to_string(),
        ));
    }

    let result = sqlx::query(
        "UPDATE cart_items SET quantity = $3 WHERE user_id = $1 AND product_id = $2",
    )
    .bind(user.user_id)
    .bind(product_id)
    .bind(payload.quantity)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    list_cart(pool, user).await
}

pub async fn remove_from_cart(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    list_cart(pool, user).await
}

pub async fn clear_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(pool)
        .await?;

    list_cart(pool, user).await
}
