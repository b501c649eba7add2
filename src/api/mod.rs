//! Web layer - page handlers and routing
//!
//! Every page follows the same shape: read the site context and the form,
//! call a service, then render a view or redirect. Routes keep the forum's
//! historical `.jsp` / `.boxlet` paths.

pub mod auth;
pub mod boxlets;
pub mod middleware;
pub mod moderation;
pub mod profile;
pub mod tags;
pub mod topics;
pub mod vote;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{AppState, PageError, PageForm, PageQuery, SiteContext};

/// Build the page router
pub fn build_page_router() -> Router<AppState> {
    Router::new()
        .route("/vote.jsp", post(vote::vote))
        .route("/vote-vote.jsp", get(vote::vote_form))
        .route("/view-vote.jsp", get(vote::view_vote))
        .route("/add.jsp", get(topics::add_form).post(topics::add))
        .route("/view-message.jsp", get(topics::view_message))
        .route("/jump-message.jsp", get(topics::jump_message))
        .route("/gallery.boxlet", get(boxlets::gallery))
        .route("/tags.jsp", get(tags::tag_cloud))
        .route("/edit-tags.jsp", post(tags::edit_tags))
        .route("/login.jsp", get(auth::login_form).post(auth::login))
        .route("/logout.jsp", get(auth::logout))
        .route("/register.jsp", get(auth::register_form).post(auth::register))
        .route("/edit-profile.jsp", get(profile::edit_form).post(profile::save))
        .route("/moderate.jsp", get(moderation::pending))
        .route("/commit.jsp", post(moderation::commit))
        .route("/banip.jsp", post(moderation::ban_ip))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE])
        .allow_credentials(true);
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => tracing::warn!("Ignoring invalid CORS origin: {}", cors_origin),
    }

    Router::new()
        .merge(build_page_router())
        // Error pages need the site context, so it wraps the renderer
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::render_errors,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::site_context,
        ))
        // Pages carry per-visitor content
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("private"),
        ))
        .route("/health", get(health))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.pool.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
        }
    }
}

#[cfg(test)]
mod tests;
