//! Poll pages
//!
//! - POST /vote.jsp - cast a vote in the current poll
//! - GET /vote-vote.jsp - voting form of a topic's poll
//! - GET /view-vote.jsp - jump from a poll to its topic

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use tera::Context as TeraContext;

use crate::api::middleware::{
    form_ids, redirect_found, AppState, FormPairs, MsgidParams, PageError, PageForm,
    PageQuery, SiteContext,
};

/// `?vote=ID`
#[derive(Debug, Deserialize)]
pub struct VoteParams {
    pub vote: i64,
}

/// POST /vote.jsp
pub async fn vote(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(pairs): PageForm<FormPairs>,
) -> Result<Response, PageError> {
    let user = ctx.require_user()?;
    let poll_id = form_ids(&pairs, "voteid")?
        .first()
        .copied()
        .ok_or_else(|| PageError::bad_input("Missing parameter: voteid"))?;

    let mut variants: Vec<i64> = Vec::new();
    for id in form_ids(&pairs, "vote")? {
        if !variants.contains(&id) {
            variants.push(id);
        }
    }

    let message = state.poll_service.vote(user.id, poll_id, &variants).await?;
    Ok(redirect_found(&message.link_with_highlight(&variants)))
}

/// GET /vote-vote.jsp?msgid=N
pub async fn vote_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageQuery(MsgidParams { msgid }): PageQuery<MsgidParams>,
) -> Result<Response, PageError> {
    ctx.require_user()?;

    let form = state.poll_service.vote_form(msgid).await?;

    let mut context = TeraContext::new();
    context.insert("message", &form.message);
    context.insert("message_link", &form.message.link());
    context.insert("poll", &form.poll);
    context.insert("variants", &form.variants);
    Ok(state.render(&ctx, "vote-vote.html", &context)?.into_response())
}

/// GET /view-vote.jsp?vote=ID
pub async fn view_vote(
    State(state): State<AppState>,
    PageQuery(VoteParams { vote }): PageQuery<VoteParams>,
) -> Result<Response, PageError> {
    let topic_id = state.poll_service.topic_of_poll(vote).await?;
    Ok(redirect_found(&format!("/jump-message.jsp?msgid={}", topic_id)))
}
