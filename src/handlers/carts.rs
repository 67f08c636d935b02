use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::handlers::UserId;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/summary", get(get_summary))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(update_item))
        .route("/items/:product_id", delete(remove_item))
        .route("/clear", post(clear_cart))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemRequest {
    #[validate(range(min = 0))]
    pub quantity: i32,
}

/// Get the caller's cart with items
async fn get_cart(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .get_cart(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Price the cart as it would check out
async fn get_summary(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let summary = state
        .services
        .carts
        .get_summary(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(summary))
}

/// Add a product to the cart
async fn add_item(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .add_item(user_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Set a cart line's quantity; zero removes the line
async fn update_item(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .update_quantity(user_id, product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove a product from the cart
async fn remove_item(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .remove_item(user_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Empty the cart
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .clear(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
