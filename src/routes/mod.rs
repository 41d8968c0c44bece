use axum::Router;

use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod courses;
pub mod doc;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;

// Build the API router without binding state; it is provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/products", products::router())
        .nest("/courses", courses::router())
        .nest("/orders", orders::router())
        .nest("/admin", admin::router())
        .nest("/payments", payments::router())
}
