pub mod auth;
pub mod clerk;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod plans;
pub mod profiles;
pub mod state;
pub mod stripe_api;
pub mod subscription_check;
pub mod webhook;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let profile_router = Router::new()
        .route("/change-plan", post(handlers::change_plan))
        .route("/unsubscribe", post(handlers::unsubscribe))
        .route("/subscription-status", get(handlers::subscription_status));

    let api_router = Router::new()
        .route("/webhook", post(handlers::handle_stripe_webhook))
        .route("/check-subscription", get(handlers::check_subscription))
        .route("/create-profile", post(handlers::create_profile))
        .route("/checkout", post(handlers::create_checkout_session))
        .nest("/profile", profile_router);

    // routes added after the gate layer are not gated
    Router::new()
        .nest("/api", api_router)
        .fallback(handlers::not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::gate_access,
        ))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
