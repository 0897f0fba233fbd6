use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::response::ApiResponse;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    /// Gateway failures carry full detail for the logs but surface to the
    /// client as a generic processing failure.
    #[error("Payment processing failed")]
    Gateway(#[source] anyhow::Error),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Gateway(_) | AppError::DbError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Gateway(source) => {
                tracing::error!(error = %source, "gateway call failed");
            }
            AppError::DbError(source) => {
                tracing::error!(error = %source, "database error");
            }
            AppError::Internal(source) => {
                tracing::error!(error = %source, "internal error");
            }
            _ => {}
        }

        let body = ApiResponse::<serde_json::Value> {
            success: false,
            status_code: status.as_u16(),
            message: self.to_string(),
            data: None,
            meta: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
