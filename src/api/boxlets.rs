//! Boxlets: page fragments embedded into other pages
//!
//! - GET /gallery.boxlet - latest gallery images

use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
};
use tera::Context as TeraContext;

use crate::api::middleware::{AppState, PageError};

/// GET /gallery.boxlet
pub async fn gallery(State(state): State<AppState>) -> Result<Response, PageError> {
    let items = state.gallery_service.items().await?;

    let mut context = TeraContext::new();
    context.insert("items", &items);
    let html = state
        .views
        .render("boxlets/gallery.html", &context)
        .map_err(PageError::internal)?;
    Ok(Html(html).into_response())
}
