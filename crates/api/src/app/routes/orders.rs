use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockgate_core::OrderId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let order = match body.into_new_order() {
        Ok(o) => o,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.engine.admission.admit(&order).await {
        Ok(id) => (StatusCode::CREATED, Json(dto::CreatedOrderResponse { id })).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: OrderId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    match services.engine.admission.get_order(id).await {
        Ok(Some(order)) => Json(dto::OrderResponse::from(order)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("order {id} not found")),
        Err(e) => errors::domain_error_to_response(e),
    }
}
