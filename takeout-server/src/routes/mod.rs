use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod export;
mod health;
mod index;
mod publickey;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::form_page))
        .route("/export", post(export::export_account))
        .route("/publickey", get(publickey::get_public_key))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
