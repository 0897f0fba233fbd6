use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::orders::{
        CancelOrderRequest, CreateOrderRequest, OrderDetail, OrderList, OrderSummary,
        ReturnOrderRequest, UpdateOrderPaymentRequest, UpdateOrderStatusRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_all_orders))
        .route("/my-orders", get(list_my_orders))
        .route("/summary", get(order_summary))
        .route("/{id}", get(get_order))
        .route("/{id}", delete(delete_order))
        .route("/{id}/status", put(update_status))
        .route("/{id}/cancel", put(cancel_order))
        .route("/{id}/return", put(return_order))
        .route("/{id}/payment", put(update_payment_status))
}

#[utoipa::path(
    post,
    path = "/v1/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderDetail>),
        (status = 400, description = "Empty order, inactive product, or insufficient stock"),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    Ok(Json(
        order_service::create_order(&state, &user, payload).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/api/orders/my-orders",
    params(
        ("status" = Option<String>, Query, description = "Order status filter"),
        ("payment_status" = Option<String>, Query, description = "Payment status filter"),
    ),
    responses(
        (status = 200, description = "Caller's orders", body = ApiResponse<OrderList>)
    ),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    Ok(Json(
        order_service::list_my_orders(&state, &user, query).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/api/orders",
    params(
        ("status" = Option<String>, Query, description = "Order status filter"),
        ("payment_status" = Option<String>, Query, description = "Payment status filter"),
    ),
    responses(
        (status = 200, description = "All orders", body = ApiResponse<OrderList>),
        (status = 403, description = "Admin only"),
    ),
    tag = "Orders"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    Ok(Json(
        order_service::list_all_orders(&state, &user, query).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/api/orders/summary",
    responses(
        (status = 200, description = "Counts by status and paid revenue", body = ApiResponse<OrderSummary>),
        (status = 403, description = "Admin only"),
    ),
    tag = "Orders"
)]
pub async fn order_summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OrderSummary>>> {
    Ok(Json(order_service::order_summary(&state, &user).await?))
}

#[utoipa::path(
    get,
    path = "/v1/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items and history", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Order not found"),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    Ok(Json(order_service::get_order(&state, &user, id).await?))
}

#[utoipa::path(
    put,
    path = "/v1/api/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status advanced", body = ApiResponse<OrderDetail>),
        (status = 400, description = "Transition not allowed"),
    ),
    tag = "Orders"
)]
pub async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    Ok(Json(
        order_service::update_status(&state, &user, id, payload).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/v1/api/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled, stock restored", body = ApiResponse<OrderDetail>),
        (status = 400, description = "Order already in a terminal state"),
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    Ok(Json(
        order_service::cancel_order(&state, &user, id, payload).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/v1/api/orders/{id}/return",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ReturnOrderRequest,
    responses(
        (status = 200, description = "Order returned", body = ApiResponse<OrderDetail>),
        (status = 400, description = "Only delivered orders can be returned"),
    ),
    tag = "Orders"
)]
pub async fn return_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReturnOrderRequest>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    Ok(Json(
        order_service::return_order(&state, &user, id, payload).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/v1/api/orders/{id}/payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderPaymentRequest,
    responses(
        (status = 200, description = "Payment status advanced", body = ApiResponse<OrderDetail>),
        (status = 400, description = "Transition not allowed"),
    ),
    tag = "Orders"
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderPaymentRequest>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    Ok(Json(
        order_service::update_payment_status(&state, &user, id, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/v1/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order soft-deleted"),
        (status = 403, description = "Admin only"),
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    Ok(Json(order_service::delete_order(&state, &user, id).await?))
}
