use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/cache/reload", post(reload_cache))
}

/// Trigger a full cache reload without waiting for it.
pub async fn reload_cache(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.engine.scheduler.reload_now() {
        Some(_) => (
            StatusCode::ACCEPTED,
            Json(dto::ReloadAcceptedResponse { status: "reloading" }),
        )
            .into_response(),
        None => errors::json_error(
            StatusCode::CONFLICT,
            "reload_in_progress",
            "a cache reload is already running",
        ),
    }
}
