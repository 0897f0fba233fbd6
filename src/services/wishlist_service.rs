use uuid::Uuid;

use crate::{
    db::DbPool,
    dto::wishlist::{AddToWishlistRequest, WishlistList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    services::product_service::{PRODUCT_COLUMNS, ProductRow, product_from_row},
};

pub async fn list_wishlist(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<WishlistList>> {
    let rows: Vec<ProductRow> = sqlx::query_as(&format!(
        r#"
        SELECT {}
        FROM wishlist_items wi
        JOIN products p ON p.id = wi.product_id
        WHERE wi.user_id = $1 AND p.is_deleted = FALSE
        ORDER BY wi.created_at DESC
        "#,
        PRODUCT_COLUMNS
            .split(", ")
            .map(|c| format!("p.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ))
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let items = rows
        .into_iter()
        .map(product_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "OK",
        WishlistList { items },
        Some(Meta::empty()),
    ))
}

pub async fn add_to_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToWishlistRequest,
) -> AppResult<ApiResponse<WishlistList>> {
    let exists: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM products WHERE id = $1 AND is_deleted = FALSE")
            .bind(payload.product_id)
            .fetch_optional(pool)
            .await?;
    if exists.is_none() {
        return Err(AppError::NotFound);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO wishlist_items (user_id, product_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, product_id) DO NOTHING
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::BadRequest(
            "Product is already in the wishlist".to_string(),
        ));
    }

    list_wishlist(pool, user).await
}

pub async fn remove_from_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<WishlistList>> {
    let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
        .bind(user.user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    list_wishlist(pool, user).await
}
