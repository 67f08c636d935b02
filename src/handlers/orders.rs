use crate::handlers::common::{
    created_response, map_service_error, success_response, PaginatedResponse, PaginationParams,
};
use crate::handlers::UserId;
use crate::services::orders::{CreateOrderInput, UpdateStatusInput};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", get(get_order_status))
        .route("/:id/status", put(update_order_status))
}

/// Materialize the caller's cart into an order
async fn create_order(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(payload): Json<CreateOrderInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .create_order(user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(order))
}

/// List the caller's orders, newest first
async fn list_orders(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let params = params.clamped(state.config.api_max_page_size);

    let (orders, total) = state
        .services
        .orders
        .list_orders(user_id, params.page, params.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        params.page,
        params.per_page,
        total,
    )))
}

/// Get one of the caller's orders with items
async fn get_order(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Compact status projection for polling
async fn get_order_status(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let status = state
        .services
        .orders
        .get_order_status(user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(status))
}

/// Advance an order along the fulfilment state machine
async fn update_order_status(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(user_id, id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
