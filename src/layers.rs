pub mod auth;
pub mod client_info;

/// `()` captures client info only, `(auth)` also requires a bearer token, `(auth, admin)`
/// additionally requires the admin role.
#[macro_export]
macro_rules! link_layer_builder {
    () => {
        || tower::ServiceBuilder::new().layer($crate::layers::client_info::ClientInfoLayer::new())
    };
    ($auth:expr $(,)?) => {
        || {
            tower::ServiceBuilder::new()
                .layer($crate::layers::client_info::ClientInfoLayer::new())
                .layer(axum::middleware::from_fn_with_state(
                    $auth.clone(),
                    $crate::layers::auth::bearer_auth_checker,
                ))
        }
    };
    ($auth:expr, admin $(,)?) => {
        || {
            tower::ServiceBuilder::new()
                .layer($crate::layers::client_info::ClientInfoLayer::new())
                .layer(axum::middleware::from_fn_with_state(
                    $auth.clone(),
                    $crate::layers::auth::bearer_auth_checker,
                ))
                .layer(axum::middleware::from_fn(
                    $crate::layers::auth::admin_checker,
                ))
        }
    };
}
