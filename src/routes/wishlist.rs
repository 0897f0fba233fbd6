use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    dto::wishlist::{AddToWishlistRequest, WishlistList},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::wishlist_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_wishlist))
        .route("/", post(add_to_wishlist))
        .route("/{product_id}", delete(remove_from_wishlist))
}

#[utoipa::path(
    get,
    path = "/v1/api/wishlist",
    responses(
        (status = 200, description = "Wishlisted products", body = ApiResponse<WishlistList>)
    ),
    tag = "Wishlist"
)]
pub async fn list_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<WishlistList>>> {
    Ok(Json(
        wishlist_service::list_wishlist(&state.pool, &user).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/v1/api/wishlist",
    request_body = AddToWishlistRequest,
    responses(
        (status = 200, description = "Product added", body = ApiResponse<WishlistList>),
        (status = 400, description = "Already in wishlist"),
    ),
    tag = "Wishlist"
)]
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToWishlistRequest>,
) -> AppResult<Json<ApiResponse<WishlistList>>> {
    Ok(Json(
        wishlist_service::add_to_wishlist(&state.pool, &user, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/v1/api/wishlist/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product removed", body = ApiResponse<WishlistList>),
        (status = 404, description = "Not in wishlist"),
    ),
    tag = "Wishlist"
)]
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<WishlistList>>> {
    Ok(Json(
        wishlist_service::remove_from_wishlist(&state.pool, &user, product_id).await?,
    ))
}
