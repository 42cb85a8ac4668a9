use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::AppError, state::room::UserId};

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the caller, taken from the [`USER_ID_HEADER`] header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub UserId);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;

        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .filter(|id| *id != 0)
            .map(CallerId)
            .ok_or_else(|| AppError::Unauthorized(format!("invalid {USER_ID_HEADER} header")))
    }
}
