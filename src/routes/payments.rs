use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{
        CreatePaymentRequest, PaymentDetail, PaymentList, PaymentSummary, RefundRequest,
        VerifyPaymentRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::PaymentListQuery,
    services::payment_service::{self, RequestMeta},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(initiate_payment))
        .route("/", get(list_all_payments))
        .route("/verify", post(verify_payment))
        .route("/webhook", post(webhook))
        .route("/my-payments", get(list_my_payments))
        .route("/summary", get(payment_summary))
        .route("/{id}", get(get_payment))
        .route("/{id}/refund", post(refund_payment))
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestMeta {
        ip: header_str("x-forwarded-for"),
        user_agent: header_str("user-agent"),
    }
}

#[utoipa::path(
    post,
    path = "/v1/api/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment record created", body = ApiResponse<PaymentDetail>),
        (status = 400, description = "Active payment already exists for the order"),
    ),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentDetail>>> {
    let meta = request_meta(&headers);
    Ok(Json(
        payment_service::initiate_payment(&state, &user, payload, meta).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/v1/api/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Signature verified, payment settled", body = ApiResponse<PaymentDetail>),
        (status = 400, description = "Invalid signature"),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentDetail>>> {
    Ok(Json(
        payment_service::verify_payment(&state, &user, payload).await?,
    ))
}

// Unauthenticated: the gateway calls this. Authenticity comes from the HMAC
// over the raw body, so the body must reach the service byte-for-byte.
#[utoipa::path(
    post,
    path = "/v1/api/payments/webhook",
    request_body(content = Vec<u8>, content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Missing or invalid signature"),
    ),
    tag = "Payments"
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok());
    Ok(Json(
        payment_service::handle_webhook(&state, signature, &body).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/api/payments/my-payments",
    params(
        ("status" = Option<String>, Query, description = "Payment status filter"),
        ("method" = Option<String>, Query, description = "Payment method filter"),
    ),
    responses(
        (status = 200, description = "Caller's payments", body = ApiResponse<PaymentList>)
    ),
    tag = "Payments"
)]
pub async fn list_my_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PaymentListQuery>,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    Ok(Json(
        payment_service::list_my_payments(&state, &user, query).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/api/payments",
    params(
        ("status" = Option<String>, Query, description = "Payment status filter"),
        ("method" = Option<String>, Query, description = "Payment method filter"),
    ),
    responses(
        (status = 200, description = "All payments", body = ApiResponse<PaymentList>),
        (status = 403, description = "Admin only"),
    ),
    tag = "Payments"
)]
pub async fn list_all_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PaymentListQuery>,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    Ok(Json(
        payment_service::list_all_payments(&state, &user, query).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/api/payments/summary",
    responses(
        (status = 200, description = "Aggregates by status and method", body = ApiResponse<PaymentSummary>),
        (status = 403, description = "Admin only"),
    ),
    tag = "Payments"
)]
pub async fn payment_summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<PaymentSummary>>> {
    Ok(Json(payment_service::payment_summary(&state, &user).await?))
}

#[utoipa::path(
    get,
    path = "/v1/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment with refund ledger", body = ApiResponse<PaymentDetail>),
        (status = 404, description = "Payment not found"),
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<PaymentDetail>>> {
    Ok(Json(payment_service::get_payment(&state, &user, id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/api/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund recorded", body = ApiResponse<PaymentDetail>),
        (status = 400, description = "Amount exceeds the remaining balance"),
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> AppResult<Json<ApiResponse<PaymentDetail>>> {
    Ok(Json(
        payment_service::refund_payment(&state, &user, id, payload).await?,
    ))
}
