use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use crate::AppState;
use crate::error::reject;

/// Validate the bearer token, make sure the caller has a profile row, and
/// expose the caller's `Identity` to handlers as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(StatusCode::UNAUTHORIZED)?;

    let identity = state
        .gateway
        .authenticator()
        .authenticate_bearer(bearer.token())
        .map_err(reject)?;
    state.gateway.store().ensure_user(&identity).await.map_err(reject)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
