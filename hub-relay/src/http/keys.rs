//! Public key directory endpoints.

use crate::directory::PublicKeyRecord;
use crate::error::DirectoryError;
use crate::server::Hub;
use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use hub_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Body of `POST /register`.
///
/// Both fields are optional here so that a missing field is reported with
/// the same message as an empty one.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// User registering the key.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Encoded public key.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Successful registration response.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    /// Always `true`.
    pub ok: bool,
}

/// Error body for key endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// `POST /register`: insert or overwrite a user's public key.
pub async fn register_handler(
    Extension(hub): Extension<Arc<Hub>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(e) => {
            tracing::debug!("Rejected registration body: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                DirectoryError::MissingField.to_string(),
            );
        }
    };

    let user_id = request.user_id.unwrap_or_default();
    let public_key = request.public_key.unwrap_or_default();

    match hub.directory().put(&user_id, &public_key).await {
        Ok(record) => {
            hub.metrics().keys_registered.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Registered public key for {}", record.user_id);
            Json(RegisterResponse { ok: true }).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// `GET /keys/:user_id`: look up one user's public key.
pub async fn get_key_handler(
    Extension(hub): Extension<Arc<Hub>>,
    Path(user_id): Path<String>,
) -> Response {
    match hub.directory().get(&user_id).await {
        Ok(Some(record)) => Json::<PublicKeyRecord>(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not found"),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// `GET /keys`: every registered key, as a user id → key object.
pub async fn list_keys_handler(Extension(hub): Extension<Arc<Hub>>) -> Response {
    match hub.directory().list_all().await {
        Ok(keys) => Json::<BTreeMap<UserId, String>>(keys).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
