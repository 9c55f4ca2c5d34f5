use axum::Router;

pub mod admin;
pub mod orders;
pub mod products;
pub mod system;

/// Router for all business endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders::router())
        .nest("/products", products::router())
        .nest("/admin", admin::router())
}
