use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, get},
};

use crate::AppState;
use crate::{assets, auth, handlers};

/// Create the application router.
///
/// Every route is registered with the prefix already applied, so the router
/// can be served directly or merged into a larger application.
pub fn create_router(state: AppState) -> Router {
    let prefix = state.prefix.as_str().to_string();

    let mut protected = Router::new()
        .route(&format!("{prefix}/-/sysinfo"), get(handlers::sysinfo))
        .route(&format!("{prefix}/"), any(handlers::entry))
        .route(&format!("{prefix}/{{*path}}"), any(handlers::entry));
    if !prefix.is_empty() {
        protected = protected.route(&prefix, any(handlers::entry));
    }
    let protected = protected.route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::auth_gate,
    ));

    let mut public = Router::new()
        .route(
            &format!("{prefix}/-/assets/{{*path}}"),
            get(assets::serve_asset),
        )
        .route(&format!("{prefix}/-/login/{{token}}"), get(auth::login));
    if !prefix.is_empty() {
        public = public.route("/", get(handlers::redirect_to_prefix));
    }

    public
        .merge(protected)
        .fallback(handlers::not_found)
        // Upload size is enforced per file while streaming
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
