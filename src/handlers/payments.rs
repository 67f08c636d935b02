use crate::handlers::common::{map_service_error, success_response};
use crate::handlers::UserId;
use crate::services::payments::{PaymentCallback, PaymentFailure};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for payment endpoints
pub fn payments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", post(open_session))
        .route("/verify", post(verify_callback))
        .route("/failure", post(record_failure))
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub order_id: Uuid,
}

/// Open a gateway payment session for a pending order
async fn open_session(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let session = state
        .services
        .payments
        .open_session(user_id, payload.order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

/// Verify a signed gateway callback and settle the order
async fn verify_callback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentCallback>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .payments
        .verify_callback(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Record a declined or abandoned gateway payment for the caller's order
async fn record_failure(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(payload): Json<PaymentFailure>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .payments
        .record_failure(user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
