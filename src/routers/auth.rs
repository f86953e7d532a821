use crate::layers::auth::bearer_token;
use crate::layers::client_info::ClientInfo;
use crate::models::api::prelude::*;
use crate::models::token::TokenResponse;
use crate::services::auth::{AuthResponse, AuthService, LoginRequest, RegisterRequest};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use std::sync::Arc;

pub type AuthRouterState = State<Arc<AuthService>>;

pub async fn register(
    client: ClientInfo,
    State(auth): AuthRouterState,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Response> {
    let res = auth.register(req, &client.origin()).await?;
    Ok(GeneralResponse::<AuthResponse>::new("User registered", Some(res))
        .into_response(StatusCode::CREATED))
}

pub async fn login(
    State(auth): AuthRouterState,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<GeneralResponse<AuthResponse>>> {
    let res = auth.login(req).await?;
    Ok(general_json_res!("Login successful", res))
}

pub async fn refresh(
    State(auth): AuthRouterState,
    headers: HeaderMap,
) -> ApiResult<Json<GeneralResponse<TokenResponse>>> {
    let token = bearer_token(&headers).ok_or(unauthorized!("Missing bearer token"))?;
    let res = auth.refresh(&token)?;
    Ok(general_json_res!("Token refreshed", res))
}
