//! Caller identity taken from trusted headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;
use domain::Actor;

use crate::error::ApiError;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const USER_HEADER: &str = "x-user-id";

/// The calling [`Actor`].
///
/// Authentication happens upstream; this only reads what the gateway in
/// front of the service forwarded.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Actor);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        };

        match header(ROLE_HEADER) {
            Some("admin") => Ok(Caller(Actor::Admin)),
            Some("customer") => {
                let raw = header(USER_HEADER).ok_or_else(|| {
                    ApiError::BadRequest(format!("{USER_HEADER} header is required"))
                })?;
                let uuid = uuid::Uuid::parse_str(raw)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid {USER_HEADER}: {e}")))?;
                Ok(Caller(Actor::Customer(UserId::from_uuid(uuid))))
            }
            Some(other) => Err(ApiError::BadRequest(format!("Unknown role: {other}"))),
            None => Err(ApiError::BadRequest(format!(
                "{ROLE_HEADER} header is required"
            ))),
        }
    }
}
