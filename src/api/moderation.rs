//! Moderator pages
//!
//! - GET /moderate.jsp - topics waiting for approval
//! - POST /commit.jsp - approve a topic
//! - POST /banip.jsp - ban or unban an address

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tera::Context as TeraContext;

use crate::api::middleware::{
    redirect_found, AppState, MsgidParams, PageError, PageForm, SiteContext,
};

#[derive(Debug, Deserialize)]
pub struct BanForm {
    pub ip: String,
    #[serde(default)]
    pub reason: String,
    /// Ban length; empty bans forever
    #[serde(default)]
    pub days: String,
    /// Non-empty lifts the ban
    #[serde(default)]
    pub unban: String,
}

/// GET /moderate.jsp
pub async fn pending(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
) -> Result<Response, PageError> {
    ctx.require_moderator()?;
    let messages = state.topic_service.pending().await?;

    let mut context = TeraContext::new();
    context.insert("messages", &messages);
    Ok(state.render(&ctx, "moderate.html", &context)?.into_response())
}

/// POST /commit.jsp
pub async fn commit(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(MsgidParams { msgid }): PageForm<MsgidParams>,
) -> Result<Response, PageError> {
    let moderator = ctx.require_moderator()?;

    let message = state.topic_service.commit_topic(msgid, moderator).await?;
    Ok(redirect_found(&message.link()))
}

/// POST /banip.jsp
///
/// `days` bans for that many days, an empty value bans forever; `unban`
/// lifts the ban instead.
pub async fn ban_ip(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(form): PageForm<BanForm>,
) -> Result<Response, PageError> {
    let moderator = ctx.require_moderator()?;
    let ip = form.ip.trim();

    if !form.unban.is_empty() {
        if !state.ip_block_service.unban_ip(ip).await? {
            tracing::info!("No ban on {} to lift", ip);
        }
        return Ok(redirect_found("/moderate.jsp"));
    }

    let until = match Some(form.days.trim()).filter(|d| !d.is_empty()) {
        Some(days) => {
            let days: i64 = days
                .parse()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| PageError::bad_input(format!("Bad ban length: {}", days)))?;
            Some(Utc::now() + Duration::days(days))
        }
        None => None,
    };

    state
        .ip_block_service
        .ban_ip(ip, &form.reason, until, moderator.id)
        .await?;
    Ok(redirect_found("/moderate.jsp"))
}
