use axum::{extract::State, http::header, response::IntoResponse};

use crate::state::AppState;

/// GET /publickey
///
/// Armored public key of the signing key, for clients to verify exports.
pub async fn get_public_key(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.public_key.to_string(),
    )
}
