use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockgate_core::DomainError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::EmptyOrder => json_error(StatusCode::BAD_REQUEST, "empty_order", message),
        DomainError::InvalidQuantity { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_quantity", message)
        }
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::ProductNotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::InsufficientStock { .. } => {
            json_error(StatusCode::CONFLICT, "insufficient_stock", message)
        }
        DomainError::StoreUnavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
