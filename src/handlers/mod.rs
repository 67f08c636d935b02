pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ApiError;

/// Header carrying the caller's identity. Authentication proper is handled
/// upstream; the storefront trusts this header from the edge.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller identity extracted from the `x-user-id` header.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let user_id = Uuid::parse_str(raw).map_err(|_| ApiError::Unauthorized)?;

        Ok(UserId(user_id))
    }
}
