use crate::link_layer_builder;
use crate::routers::auth::{login, refresh, register};
use crate::routers::invite_code::{
    create_invite_code, delete_invite_code, get_invite_code, get_invite_code_stats,
    list_all_invite_codes, list_invite_code_usages, list_my_invite_code_usages,
    list_my_invite_codes, redeem_invite_code, update_invite_code_status, validate_invite_code,
};
use crate::routers::user::{change_password, fetch_profile, list_my_redemptions, modify_profile};
use crate::services::auth::AuthService;
use crate::services::invite_code::InviteCodeService;
use crate::services::states::LinkState;
use axum::Router;
use axum::http::{HeaderName, Request};
use axum::routing::{get, post, put};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::info_span;

mod auth;
mod invite_code;
mod user;

pub fn router(state: Arc<LinkState>) -> Router {
    let invite_service = Arc::new(InviteCodeService::new(state.clone()));
    let auth_service = Arc::new(AuthService::new(state.clone(), invite_service.clone()));
    let raw_layer = link_layer_builder!();
    let authed_layer = link_layer_builder!(auth_service);
    let admin_layer = link_layer_builder!(auth_service, admin);
    let auth_router = {
        Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/refresh", post(refresh))
            .layer(raw_layer())
            .with_state(auth_service.clone())
    };
    let user_router = {
        Router::new()
            .route(
                "/profile",
                get(fetch_profile).put(modify_profile).patch(modify_profile),
            )
            .route("/password", put(change_password))
            .route("/redemptions", get(list_my_redemptions))
            .layer(authed_layer())
            .with_state((auth_service.clone(), invite_service.clone()))
    };
    let invite_code_router = {
        Router::new()
            .merge(
                Router::new()
                    .route("/validate/{code}", get(validate_invite_code))
                    .layer(raw_layer()),
            )
            .merge(
                Router::new()
                    .route("/", post(create_invite_code))
                    .route("/my", get(list_my_invite_codes))
                    .route("/my/usages", get(list_my_invite_code_usages))
                    .route("/redeem", post(redeem_invite_code))
                    .route(
                        "/{id}",
                        get(get_invite_code).delete(delete_invite_code),
                    )
                    .route("/{id}/status", put(update_invite_code_status))
                    .route("/{id}/usages", get(list_invite_code_usages))
                    .layer(authed_layer()),
            )
            .with_state(invite_service.clone())
    };
    let admin_router = {
        Router::new()
            .route("/invite-codes", get(list_all_invite_codes))
            .route("/invite-codes/stats", get(get_invite_code_stats))
            .layer(admin_layer())
            .with_state(invite_service)
    };
    let trace_header = HeaderName::from_static("x-request-id");
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .nest("/auth", auth_router)
                .nest("/user", user_router)
                .nest("/invite-codes", invite_code_router)
                .nest("/admin", admin_router),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    trace_header.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                        let rid = req
                            .extensions()
                            .get::<RequestId>()
                            .and_then(|r| r.header_value().to_str().ok())
                            .unwrap_or("-");
                        info_span!(
                            "http.request",
                            request_id = %rid,
                            method = %req.method(),
                            uri = %req.uri(),
                            version = ?req.version(),
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::new(trace_header))
                .concurrency_limit(state.config.common.concurrency_limit),
        )
}
