use std::collections::HashMap;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::{errors::AppError, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY_PARAM: &str = "apiKey";

/// Guards the MCP routes when `MCP_AUTH_KEY` is configured.
///
/// The key is accepted as a bearer token, an `X-API-Key` header or an
/// `apiKey` query parameter, in that order.
pub async fn require_api_key(
    State(state): State<AppState>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.auth_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let header_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let provided = auth_header
        .as_ref()
        .map(|TypedHeader(auth)| auth.token())
        .or(header_key)
        .or(query.get(API_KEY_QUERY_PARAM).map(String::as_str));

    match provided {
        None => {
            return Err(AppError::unauthorized(
                "missing_api_key",
                "provide the API key via Authorization: Bearer, X-API-Key or ?apiKey=",
            ))
        }
        Some(key) if key != expected => {
            return Err(AppError::unauthorized("invalid_api_key", "invalid API key"))
        }
        Some(_) => {}
    }

    Ok(next.run(request).await)
}
