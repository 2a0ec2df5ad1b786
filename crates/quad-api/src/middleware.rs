use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use chrono::Utc;
use tracing::warn;

use quad_gateway::auth::verify_token;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the JWT, refresh the caller's profile mirror, and
/// attach the claims to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;
    let claims = verify_token(bearer.token(), &state.jwt_secret).ok_or(ApiError::Unauthorized)?;

    let profile = claims.profile();
    if let Err(e) = state
        .store(move |db| db.upsert_profile(&profile, Utc::now()))
        .await
    {
        warn!("Profile refresh failed for {}: {}", claims.sub, e);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
