use axum::{
    Form,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use takeout_core::SealStage;
use takeout_proto::sanitize_subject;
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ExportForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

fn transition(request_id: &str, state: &'static str) {
    tracing::info!(request_id, state, "Export state");
}

/// POST /export
///
/// RECEIVED -> FETCHING -> FETCHED -> SERIALIZING -> SEALING -> DELIVERED,
/// with the sealer logging its own signing/encrypting/archiving steps.
pub async fn export_account(
    State(state): State<AppState>,
    Form(form): Form<ExportForm>,
) -> ServerResult<Response> {
    let request_id = Uuid::new_v4().simple().to_string();
    transition(&request_id, "RECEIVED");

    // Matched exactly as submitted
    let ExportForm { username, email } = form;
    if username.is_empty() || email.is_empty() {
        tracing::info!(request_id, "Empty identity claim");
        transition(&request_id, "FETCH_FAILED");
        return Err(ServerError::InvalidIdentity);
    }

    transition(&request_id, "FETCHING");
    let fetcher = state.fetcher.clone();
    let claim = username.clone();
    let dump = tokio::task::spawn_blocking(move || fetcher.fetch(&claim, &email))
        .await
        .map_err(|e| ServerError::Internal(format!("Fetch task failed: {e}")))?
        .inspect_err(|e| {
            tracing::warn!(request_id, error = %e, "Fetch failed");
            transition(&request_id, "FETCH_FAILED");
        })?;
    transition(&request_id, "FETCHED");

    transition(&request_id, "SERIALIZING");
    let format = state.config.export.format;
    let payload = dump
        .encode(format)
        .map_err(|e| ServerError::Internal(format!("Serializing export failed: {e}")))?;
    drop(dump);

    transition(&request_id, "SEALING");
    let subject = sanitize_subject(&username);
    let bundle = state
        .sealer
        .seal(&request_id, &subject, format, &payload)
        .await
        .inspect_err(|e| {
            let failed = match e.stage() {
                SealStage::Signing => "SIGN_FAILED",
                SealStage::Encrypting => "ENCRYPT_FAILED",
                SealStage::Archiving => "ARCHIVE_FAILED",
            };
            transition(&request_id, failed);
        })?;

    tracing::info!(
        request_id,
        file = %bundle.file_name(),
        bytes = bundle.bytes.len(),
        mode = %state.sealer.mode(),
        "Export ready"
    );
    transition(&request_id, "DELIVERED");

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", bundle.file_name()),
        )
        .header(header::CONTENT_LENGTH, bundle.bytes.len())
        .body(Body::from(bundle.bytes))
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(response)
}
