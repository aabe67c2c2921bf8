use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use takeout_core::BundleError;
use takeout_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid username or email")]
    InvalidIdentity,

    #[error("Export failed: {0}")]
    Seal(#[from] BundleError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::IdentityNotFound => ServerError::InvalidIdentity,
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidIdentity => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Seal(e) if e.is_timeout() => {
                tracing::error!("Export timed out: {}", e);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    format!("Timed out while {}", e.stage()),
                )
            }
            ServerError::Seal(e) => {
                tracing::error!("Export failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Export failed while {}", e.stage()),
                )
            }
            ServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use takeout_core::{CoreError, SealStage};

    async fn status_and_body(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_identity_is_400() {
        let (status, body) = status_and_body(ServerError::InvalidIdentity).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid username or email");
    }

    #[tokio::test]
    async fn test_crypto_failure_is_500() {
        let err = ServerError::Seal(BundleError::Crypto {
            stage: SealStage::Signing,
            source: CoreError::KeyNotFound("ABCD1234".into()),
        });
        let (status, body) = status_and_body(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Export failed while signing");
    }

    #[tokio::test]
    async fn test_deadline_overrun_is_504() {
        let err = ServerError::Seal(BundleError::Timeout {
            stage: SealStage::Encrypting,
            deadline: Duration::from_secs(30),
        });
        let (status, body) = status_and_body(err).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "Timed out while encrypting");

        let err = ServerError::Seal(BundleError::Crypto {
            stage: SealStage::Signing,
            source: CoreError::Timeout(Duration::from_secs(30)),
        });
        let (status, body) = status_and_body(err).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "Timed out while signing");
    }

    #[tokio::test]
    async fn test_internal_details_stay_in_logs() {
        let (status, body) = status_and_body(ServerError::Internal("disk on fire".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }
}
