//! Login and registration pages
//!
//! - GET /login.jsp - login form
//! - POST /login.jsp - verify credentials, open a session, set remember-me cookies
//! - GET /logout.jsp - drop the session and the cookies
//! - GET /register.jsp - registration form
//! - POST /register.jsp - create a member, then send them to the login form

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use tera::Context as TeraContext;

use crate::api::middleware::{
    redirect_found, set_cookie, AppState, PageError, PageForm, SiteContext, PASSWORD_COOKIE,
    PROFILE_COOKIE, SESSION_COOKIE,
};
use crate::services::UserServiceError;

/// GET /login.jsp
pub async fn login_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
) -> Result<Response, PageError> {
    let context = TeraContext::new();
    Ok(state.render(&ctx, "login.html", &context)?.into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub passwd: String,
}

/// POST /login.jsp
pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(form): PageForm<LoginForm>,
) -> Result<Response, PageError> {
    let nick = form.nick.trim().to_string();
    let password = form.passwd;

    let (user, session) = match state.user_service.login(&nick, &password).await {
        Ok(login) => login,
        Err(e @ (UserServiceError::AuthenticationError(_) | UserServiceError::UserNotFound(_))) => {
            tracing::info!("Failed login of '{}' from {}: {}", nick, ctx.client_ip, e);
            let mut context = TeraContext::new();
            context.insert("nick", &nick);
            context.insert("error", &e.to_string());
            return Ok(state.render(&ctx, "login.html", &context)?.into_response());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("User {} logged in from {}", user.nick, ctx.client_ip);

    let max_age = state.cookie_max_age();
    let cookies = [
        set_cookie(SESSION_COOKIE, &session.id, max_age),
        set_cookie(PROFILE_COOKIE, &user.nick, max_age),
        set_cookie(PASSWORD_COOKIE, &state.user_service.remember_me_token(&user), max_age),
    ];
    Ok(with_cookies(redirect_found(&ctx.main_url), &cookies))
}

/// GET /logout.jsp
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
) -> Result<Response, PageError> {
    if let Some(session_id) = &ctx.session_id {
        state.user_service.logout(session_id).await?;
    }

    let cookies = [
        set_cookie(SESSION_COOKIE, "", 0),
        set_cookie(PROFILE_COOKIE, "", 0),
        set_cookie(PASSWORD_COOKIE, "", 0),
    ];
    Ok(with_cookies(redirect_found(&ctx.main_url), &cookies))
}

/// GET /register.jsp
pub async fn register_form(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
) -> Result<Response, PageError> {
    let context = TeraContext::new();
    Ok(state.render(&ctx, "register.html", &context)?.into_response())
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password2: String,
    #[serde(default)]
    pub email: String,
}

/// POST /register.jsp
pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<SiteContext>,
    PageForm(form): PageForm<RegisterForm>,
) -> Result<Response, PageError> {
    let nick = form.nick.trim().to_string();
    let email = Some(form.email.trim().to_string()).filter(|e| !e.is_empty());

    let result = if form.password != form.password2 {
        Err(UserServiceError::ValidationError(
            "Passwords do not match".to_string(),
        ))
    } else {
        state.user_service.register(&nick, &form.password, email.clone()).await
    };

    match result {
        Ok(user) => {
            tracing::info!("User {} registered from {}", user.nick, ctx.client_ip);
            Ok(redirect_found(&format!("{}login.jsp", ctx.secure_main_url)))
        }
        Err(e @ (UserServiceError::ValidationError(_) | UserServiceError::UserExists(_))) => {
            let mut context = TeraContext::new();
            context.insert("nick", &nick);
            context.insert("email", &email.unwrap_or_default());
            context.insert("error", &e.to_string());
            Ok(state.render(&ctx, "register.html", &context)?.into_response())
        }
        Err(e) => Err(e.into()),
    }
}

fn with_cookies(mut response: Response, cookies: &[String]) -> Response {
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}
