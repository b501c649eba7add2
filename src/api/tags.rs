//! Tag pages
//!
//! - GET /tags.jsp - tag cloud
//! - POST /edit-tags.jsp - replace the tags of a topic

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use tera::Context as TeraContext;

use crate::api::middleware::{redirect_found, AppState, PageError, PageForm, SiteContext};
use crate::models::message_link;

/// GET /tags.jsp
pub async fn tag_cloud(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
) -> Result<Response, PageError> {
    let tags = state.tag_service.tag_cloud().await?;

    let mut context = TeraContext::new();
    context.insert("tags", &tags);
    Ok(state.render(&ctx, "tags.html", &context)?.into_response())
}

#[derive(Debug, Deserialize)]
pub struct EditTagsForm {
    pub msgid: i64,
    #[serde(default)]
    pub tags: String,
}

/// POST /edit-tags.jsp
pub async fn edit_tags(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(form): PageForm<EditTagsForm>,
) -> Result<Response, PageError> {
    let user = ctx.require_user()?;
    let msgid = form.msgid;

    let modified = state
        .topic_service
        .edit_tags(msgid, &form.tags, user)
        .await?;
    if modified {
        tracing::info!("Tags of topic {} changed by {}", msgid, user.nick);
    }

    Ok(redirect_found(&message_link(msgid)))
}
