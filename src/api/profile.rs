//! Profile pages
//!
//! - GET /edit-profile.jsp - display settings of the logged-in member
//! - POST /edit-profile.jsp - save them

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use tera::Context as TeraContext;

use crate::api::middleware::{redirect_found, AppState, PageError, PageForm, SiteContext};
use crate::models::{Profile, STYLES};
use crate::services::UserServiceError;

fn profile_context(profile: &Profile) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("profile", profile);
    context.insert("styles", STYLES);
    context.insert("is_default", &profile.is_default());
    context
}

/// GET /edit-profile.jsp
pub async fn edit_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
) -> Result<Response, PageError> {
    ctx.require_user()?;
    let context = profile_context(&ctx.profile);
    Ok(state.render(&ctx, "edit-profile.html", &context)?.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    pub style: String,
}

/// POST /edit-profile.jsp
pub async fn save(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(form): PageForm<ProfileForm>,
) -> Result<Response, PageError> {
    let user = ctx.require_user()?;
    let profile = Profile::with_style(form.style.trim());

    match state.user_service.write_profile(&user.nick, &profile).await {
        Ok(()) => Ok(redirect_found(&format!("{}edit-profile.jsp", ctx.main_url))),
        Err(e @ UserServiceError::ValidationError(_)) => {
            let mut context = profile_context(&ctx.profile);
            context.insert("error", &e.to_string());
            Ok(state.render(&ctx, "edit-profile.html", &context)?.into_response())
        }
        Err(e) => Err(e.into()),
    }
}
