use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::products::{AdjustStockRequest, CreateProductRequest, ProductList, UpdateProductRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, ProductStatus},
    response::{ApiResponse, Meta},
    routes::params::{LowStockQuery, ProductQuery, ProductSortBy, SortOrder},
};

#[derive(FromRow)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub status: String,
    pub colors: Vec<String>,
    pub sizes: Vec<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const PRODUCT_COLUMNS: &str = "id, name, description, price, stock, status, colors, \
     sizes, category, created_at, updated_at";

pub(crate) fn product_from_row(row: ProductRow) -> AppResult<Product> {
    let status: ProductStatus = row
        .status
        .parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(Product {
        id: row.id,
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
    })
}

pub async fn list_products(
    pool: &DbPool,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut builder = QueryBuilder::new(format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_deleted = FALSE"
    ));
    let mut count_builder =
        QueryBuilder::new("SELECT COUNT(*) FROM products WHERE is_deleted = FALSE");

    for b in [&mut builder, &mut count_builder] {
        if let Some(q) = query.q.as_ref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{q}%");
            b.push(" AND (name ILIKE ").push_bind(pattern.clone());
            b.push(" OR description ILIKE ").push_bind(pattern);
            b.push(")");
        }
        if let Some(category) = query.category.as_ref().filter(|s| !s.is_empty()) {
            b.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(min) = query.min_price {
            b.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = query.max_price {
            b.push(" AND price <= ").push_bind(max);
        }
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    builder.push(format!(
        " ORDER BY {} {} LIMIT ",
        sort_by.as_sql(),
        sort_order.as_sql()
    ));
    builder.push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);

    let rows: Vec<ProductRow> = builder.build_query_as().fetch_all(pool).await?;
    let total: (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    let items = rows
        .into_iter()
        .map(product_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("OK", ProductList { items }, Some(meta)))
}

pub async fn get_product(pool: &DbPool, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let row: Option<ProductRow> = sqlx::query_as(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND is_deleted = FALSE"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success(
        "OK",
        product_from_row(row)?,
        Some(Meta::empty()),
    ))
}

pub async fn create_product(
    pool: &DbPool,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.price < 0 {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    if payload.stock < 0 {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }

    let id = Uuid::new_v4();
    let status = if payload.stock == 0 {
        ProductStatus::OutOfStock
    } else {
        ProductStatus::Active
    };

    let row: ProductRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO products (id, name, description, price, stock, status, colors, sizes, category)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.price)
    .bind(payload.stock)
    .bind(status.as_str())
    .bind(&payload.colors)
    .bind(&payload.sizes)
    .bind(&payload.category)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::created("Product created", product_from_row(row)?))
}

pub async fn update_product(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    let existing: Option<ProductRow> = sqlx::query_as(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND is_deleted = FALSE"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let existing = existing.ok_or(AppError::NotFound)?;

    if let Some(price) = payload.price
        && price < 0
    {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }

    let name = payload.name.unwrap_or(existing.name);
    let description = payload.description.or(existing.description);
    let price = payload.price.unwrap_or(existing.price);
    let status = payload
        .status
        .map(|s| s.as_str().to_string())
        .unwrap_or(existing.status);
    let colors = payload.colors.unwrap_or(existing.colors);
    let sizes = payload.sizes.unwrap_or(existing.sizes);
    let category = payload.category.or(existing.category);

    let row: ProductRow = sqlx::query_as(&format!(
        r#"
        UPDATE products
        SET name = $2, description = $3, price = $4, status = $5, colors = $6,
            sizes = $7, category = $8, updated_at = now()
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&name)
    .bind(&description)
    .bind(price)
    .bind(&status)
    .bind(&colors)
    .bind(&sizes)
    .bind(&category)
    .fetch_one(pool)
    .await?;

    Ok(ApiResponse::success(
        "Product updated",
        product_from_row(row)?,
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let result = sqlx::query(
        "UPDATE products SET is_deleted = TRUE, updated_at = now() WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    pool: &DbPool,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination.normalize();

    let rows: Vec<ProductRow> = sqlx::query_as(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE is_deleted = FALSE AND stock <= $1
        ORDER BY stock ASC, created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(threshold)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM products WHERE is_deleted = FALSE AND stock <= $1")
            .bind(threshold)
            .fetch_one(pool)
            .await?;

    let items = rows
        .into_iter()
        .map(product_from_row)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success(
        "Low stock",
        ProductList { items },
        Some(meta),
    ))
}

pub async fn adjust_stock(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
    payload: AdjustStockRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let mut txn = pool.begin().await?;

    let current: Option<(i32,)> =
        sqlx::query_as("SELECT stock FROM products WHERE id = $1 AND is_deleted = FALSE FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *txn)
            .await?;
    let (stock,) = current.ok_or(AppError::NotFound)?;

    let new_stock = stock + payload.delta;
    if new_stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }

    let row: ProductRow = sqlx::query_as(&format!(
        r#"
        UPDATE products
        SET stock = $2,
            status = CASE
                WHEN $2 = 0 THEN 'out_of_stock'
                WHEN status = 'out_of_stock' AND $2 > 0 THEN 'active'
                ELSE status
            END,
            updated_at = now()
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(new_stock)
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "stock_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Stock updated",
        product_from_row(row)?,
        Some(Meta::empty()),
    ))
}
