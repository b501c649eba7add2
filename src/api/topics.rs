//! Topic pages
//!
//! - GET /add.jsp - new topic form
//! - POST /add.jsp - preview or post a topic
//! - GET /view-message.jsp - topic page with tags and poll results
//! - GET /jump-message.jsp - redirect to the canonical topic link

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;
use uuid::Uuid;

use crate::api::middleware::{
    form_ids, form_value, form_values, redirect_found, AppState, FormPairs, MsgidParams, PageError,
    PageForm, PageQuery, SiteContext,
};
use crate::models::{message_link, Group, PollResults};
use crate::services::{tags_to_string, AddMessageForm, PostingContext, SubmitOutcome};

/// Number of poll variant inputs on an empty form
const POLL_INPUTS: usize = 5;

/// `?group=N` on the topic form
#[derive(Debug, Deserialize)]
pub struct GroupParams {
    pub group: i64,
}

/// `group` may arrive in the body or in the form's action URL
#[derive(Debug, Default, Deserialize)]
pub struct AddParams {
    #[serde(default)]
    pub group: Option<String>,
}

impl AddMessageForm {
    fn from_pairs(pairs: &[(String, String)], url_group: Option<&str>) -> Result<Self, PageError> {
        let text = |key: &str| form_value(pairs, key).unwrap_or_default().to_string();
        let flag = |key: &str| form_value(pairs, key).is_some_and(|v| !v.is_empty());

        let group = form_value(pairs, "group")
            .or(url_group)
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| PageError::bad_input("Missing parameter: group"))?;
        let group = group
            .parse()
            .map_err(|_| PageError::bad_input(format!("Bad parameter group: {}", group)))?;

        Ok(Self {
            group,
            title: text("title"),
            msg: text("msg"),
            url: text("url"),
            linktext: text("linktext"),
            image: text("image"),
            tags: text("tags"),
            poll: form_values(pairs, "poll").into_iter().map(str::to_string).collect(),
            multiselect: flag("multiselect"),
            preview: flag("preview"),
            flood_token: text("session"),
            nick: text("nick"),
            password: text("password"),
        })
    }
}

/// Form page context shared by the empty form, the preview and the error case
fn form_context(state: &AppState, ctx: &SiteContext, group: &Group, form: &AddMessageForm) -> TeraContext {
    let mut poll_inputs = form.poll_variants();
    poll_inputs.resize(poll_inputs.len().max(POLL_INPUTS), String::new());

    let mut context = TeraContext::new();
    context.insert("group", group);
    context.insert("form", form);
    context.insert("poll_inputs", &poll_inputs);
    context.insert("flood_token", &state.topic_service.flood_token(ctx.flood_key()));
    context
}

/// GET /add.jsp?group=N
pub async fn add_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageQuery(params): PageQuery<GroupParams>,
) -> Result<Response, PageError> {
    let group_id = params.group;
    let add = state
        .topic_service
        .add_form(group_id, ctx.user.as_ref())
        .await?;

    let form = AddMessageForm {
        group: group_id,
        ..AddMessageForm::default()
    };
    let mut context = form_context(&state, &ctx, &add.group, &form);
    context.insert("top_tags", &add.top_tags);
    Ok(state.render(&ctx, "add.html", &context)?.into_response())
}

/// POST /add.jsp
pub async fn add(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageQuery(params): PageQuery<AddParams>,
    PageForm(pairs): PageForm<FormPairs>,
) -> Result<Response, PageError> {
    let form = AddMessageForm::from_pairs(&pairs, params.group.as_deref())?;
    let posting = PostingContext {
        session_user: ctx.user.clone(),
        client_ip: ctx.client_ip.clone(),
        flood_key: ctx.flood_key().to_string(),
    };

    match state.topic_service.submit(&form, &posting).await {
        Ok(SubmitOutcome::Preview {
            group,
            message,
            body_html,
        }) => {
            let mut context = form_context(&state, &ctx, &group, &form);
            context.insert("top_tags", &state.topic_service.top_tags().await?);
            context.insert("preview", &message);
            context.insert("preview_html", &body_html);
            Ok(state.render(&ctx, "add.html", &context)?.into_response())
        }
        Ok(SubmitOutcome::Posted { group, msgid }) if !group.moderated => {
            let nocache = Uuid::new_v4().as_u128() as u32;
            Ok(redirect_found(&format!(
                "{}view-message.jsp?msgid={}&nocache={}",
                ctx.main_url, msgid, nocache
            )))
        }
        Ok(SubmitOutcome::Posted { group, msgid }) => {
            let mut context = TeraContext::new();
            context.insert("group", &group);
            context.insert(
                "url",
                &format!("{}{}", ctx.main_url, message_link(msgid).trim_start_matches('/')),
            );
            Ok(state.render(&ctx, "add-done-moderated.html", &context)?.into_response())
        }
        Err(e) if e.is_user_error() && !form.has_poll() => {
            tracing::debug!("Topic form rejected: {}", e);
            let group = state.topic_service.group(form.group).await?;
            let mut context = form_context(&state, &ctx, &group, &form);
            context.insert("top_tags", &state.topic_service.top_tags().await?);
            context.insert("error", &e.to_string());
            Ok(state.render(&ctx, "add.html", &context)?.into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// One variant row of the results table
#[derive(Debug, Serialize)]
struct PollRow {
    id: i64,
    label: String,
    votes: i64,
    percent: i64,
    highlighted: bool,
}

#[derive(Debug, Serialize)]
struct PollView {
    id: i64,
    title: String,
    current: bool,
    total_votes: i64,
    rows: Vec<PollRow>,
}

impl From<&PollResults> for PollView {
    fn from(results: &PollResults) -> Self {
        let rows = results
            .variants
            .iter()
            .map(|variant| PollRow {
                id: variant.id,
                label: variant.label.clone(),
                votes: variant.votes,
                percent: results.percent(variant),
                highlighted: results.highlight.contains(&variant.id),
            })
            .collect();

        Self {
            id: results.poll.id,
            title: results.poll.title.clone(),
            current: results.current,
            total_votes: results.total_votes,
            rows,
        }
    }
}

/// GET /view-message.jsp?msgid=N[&highlight=V...]
pub async fn view_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageQuery(MsgidParams { msgid }): PageQuery<MsgidParams>,
    PageQuery(pairs): PageQuery<FormPairs>,
) -> Result<Response, PageError> {
    let highlight = form_ids(&pairs, "highlight")?;

    let view = state.topic_service.view(msgid, highlight).await?;

    let is_author = ctx.user.as_ref().is_some_and(|u| u.id == view.message.author_id);
    let can_edit_tags = ctx.is_moderator() || ctx.is_corrector() || is_author;
    let can_commit = ctx.is_moderator() && view.group.moderated && !view.message.committed;

    let mut context = TeraContext::new();
    context.insert("message", &view.message);
    context.insert("group", &view.group);
    context.insert("tags", &view.tags);
    context.insert("tags_input", &tags_to_string(&view.tags));
    context.insert("body_html", &view.body_html);
    context.insert("poll", &view.poll.as_ref().map(PollView::from));
    context.insert("can_edit_tags", &can_edit_tags);
    context.insert("can_commit", &can_commit);
    Ok(state.render(&ctx, "view-message.html", &context)?.into_response())
}

/// GET /jump-message.jsp?msgid=N
pub async fn jump_message(
    State(state): State<AppState>,
    PageQuery(MsgidParams { msgid }): PageQuery<MsgidParams>,
) -> Result<Response, PageError> {
    let link = state.topic_service.link(msgid).await?;
    Ok(redirect_found(&link))
}
