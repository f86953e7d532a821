use crate::models::api::prelude::*;
use crate::models::users::UserRow;
use crate::services::auth::AuthService;
use axum::extract::{FromRequestParts, Request as AxumExtractRequest, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::IntoResponse;
use std::sync::Arc;

/// The active account behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRow);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> ApiResult<Self> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(internal!(
                "Cannot extract authed user info. Is `bearer_auth_checker` enabled?"
            ))
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim().to_owned())
        .filter(|t| !t.is_empty())
}

pub async fn bearer_auth_checker(
    State(auth): State<Arc<AuthService>>,
    mut request: AxumExtractRequest,
    next: Next,
) -> ApiResult<impl IntoResponse> {
    let Some(token) = bearer_token(request.headers()) else {
        return Err(unauthorized!("Missing bearer token"));
    };
    let user = auth.authenticate(&token).await?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

pub async fn admin_checker(
    CurrentUser(user): CurrentUser,
    request: AxumExtractRequest,
    next: Next,
) -> ApiResult<impl IntoResponse> {
    if !user.is_admin() {
        tracing::warn!(user_id = user.id, "Non-admin tried to reach an admin route");
        return Err(forbidden!("Admin access required"));
    }
    Ok(next.run(request).await)
}
