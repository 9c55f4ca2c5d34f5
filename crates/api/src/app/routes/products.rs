use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stockgate_core::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:id", get(get_product).put(save_product).delete(remove_product))
}

fn parse_id(id: &str) -> Result<ProductId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"))
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.catalog.get_product(id).await {
        Ok(product) => Json(product).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn save_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SaveProductRequest>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let product = match body.into_product(id) {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.engine.catalog.save_product(product).await {
        Ok(product) => Json(product).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn remove_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.catalog.remove_product(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}
