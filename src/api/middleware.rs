//! Request middleware
//!
//! Contains:
//! - Application state shared by the handlers
//! - Site context (session authorization, remember-me restore, client address)
//! - Page errors and their rendering through the `error` view
//! - Form and query extractors that reject with a [`PageError`]

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        ConnectInfo, Form, FromRequest, FromRequestParts, Query, Request, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use chrono::{Datelike, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tera::Context as TeraContext;

use crate::cache::Cache;
use crate::config::{Config, SiteConfig};
use crate::db::repositories::{
    SqlxGalleryRepository, SqlxGroupRepository, SqlxIpBlockRepository, SqlxMessageRepository,
    SqlxPollRepository, SqlxProfileRepository, SqlxSessionRepository, SqlxTagRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{CurrentUser, Profile, User};
use crate::services::{
    BlockError, FloodProtection, GalleryError, GalleryService, IpBlockService, PollService,
    PollServiceError, TagService, TagServiceError, TopicService, TopicServiceError, UserService,
    UserServiceError,
};
use crate::views::{SiteVars, ViewEngine};

pub const SESSION_COOKIE: &str = "session";
pub const PROFILE_COOKIE: &str = "profile";
pub const PASSWORD_COOKIE: &str = "password";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub site: Arc<SiteConfig>,
    /// Peers allowed to report the client address in forwarding headers
    pub trusted_proxies: Arc<Vec<IpAddr>>,
    pub views: Arc<ViewEngine>,
    pub user_service: Arc<UserService>,
    pub topic_service: Arc<TopicService>,
    pub poll_service: Arc<PollService>,
    pub tag_service: Arc<TagService>,
    pub ip_block_service: Arc<IpBlockService>,
    pub gallery_service: Arc<GalleryService>,
}

impl AppState {
    /// Wire repositories and services together
    pub fn new(
        config: &Config,
        pool: DynDatabasePool,
        cache: Arc<Cache>,
        views: ViewEngine,
    ) -> anyhow::Result<Self> {
        let user_service = Arc::new(UserService::new(
            pool.clone(),
            SqlxUserRepository::boxed(),
            SqlxSessionRepository::boxed(),
            SqlxProfileRepository::boxed(),
            config.site.session_days,
            config.site.secret.clone(),
        ));
        let tag_service = Arc::new(TagService::new(pool.clone(), SqlxTagRepository::boxed()));
        let poll_service = Arc::new(PollService::new(
            pool.clone(),
            SqlxPollRepository::boxed(),
            SqlxMessageRepository::boxed(),
        ));
        let ip_block_service = Arc::new(IpBlockService::new(
            pool.clone(),
            SqlxIpBlockRepository::boxed(),
            config.dnsbl.clone(),
        ));
        let gallery_service = Arc::new(GalleryService::new(
            pool.clone(),
            SqlxGalleryRepository::boxed(),
            cache,
            Duration::from_secs(config.cache.ttl_seconds),
        ));
        let topic_service = Arc::new(TopicService::new(
            pool.clone(),
            SqlxGroupRepository::boxed(),
            SqlxMessageRepository::boxed(),
            user_service.clone(),
            tag_service.clone(),
            poll_service.clone(),
            ip_block_service.clone(),
            gallery_service.clone(),
            FloodProtection::new(&config.site.secret)?,
        ));

        Ok(Self {
            pool,
            site: Arc::new(config.site.clone()),
            trusted_proxies: Arc::new(config.server.trusted_proxy_addrs()),
            views: Arc::new(views),
            user_service,
            topic_service,
            poll_service,
            tag_service,
            ip_block_service,
            gallery_service,
        })
    }

    /// Render a full page for the current visitor
    pub fn render(
        &self,
        ctx: &SiteContext,
        template: &str,
        context: &TeraContext,
    ) -> Result<Html<String>, PageError> {
        self.views
            .render_page(template, context, &ctx.site_vars())
            .map(Html)
            .map_err(PageError::internal)
    }

    /// `Max-Age` of the login cookies
    pub fn cookie_max_age(&self) -> i64 {
        self.site.session_days * 24 * 60 * 60
    }
}

// ============================================================================
// Site context
// ============================================================================

/// Per-request view of the visitor
#[derive(Debug, Clone)]
pub struct SiteContext {
    pub user: Option<User>,
    pub session_id: Option<String>,
    pub profile: Profile,
    pub client_ip: String,
    pub main_url: String,
    pub secure_main_url: String,
}

impl SiteContext {
    pub fn new(site: &SiteConfig, client_ip: String) -> Self {
        Self {
            user: None,
            session_id: None,
            profile: Profile::default(),
            client_ip,
            main_url: site.main_url.clone(),
            secure_main_url: site.secure_main_url(),
        }
    }

    fn authorize(&mut self, user: User, session_id: String) {
        self.user = Some(user);
        self.session_id = Some(session_id);
    }

    pub fn is_session_authorized(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_moderator(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.can_moderate)
    }

    pub fn is_corrector(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.can_correct)
    }

    /// The logged-in member, or "Not authorized"
    pub fn require_user(&self) -> Result<&User, PageError> {
        self.user
            .as_ref()
            .ok_or_else(|| PageError::access_violation("Not authorized"))
    }

    pub fn require_moderator(&self) -> Result<&User, PageError> {
        let user = self.require_user()?;
        if !user.can_moderate {
            return Err(PageError::access_violation("Not a moderator"));
        }
        Ok(user)
    }

    /// Key flood-protection tokens are bound to: the session, else the address
    pub fn flood_key(&self) -> &str {
        self.session_id.as_deref().unwrap_or(&self.client_ip)
    }

    pub fn site_vars(&self) -> SiteVars {
        SiteVars {
            main_url: self.main_url.clone(),
            secure_main_url: self.secure_main_url.clone(),
            current_user: self.user.as_ref().map(CurrentUser::from),
            style: self.profile.style.clone(),
            year: Utc::now().year(),
        }
    }
}

/// Value of a request cookie
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value; a zero `max_age` removes the cookie
pub fn set_cookie(name: &str, value: &str, max_age: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name,
        urlencoding::encode(value),
        max_age
    )
}

/// Client address.
///
/// The peer address of the connection, unless the peer is one of
/// `trusted_proxies`: then the first `X-Forwarded-For` hop, else
/// `X-Real-IP`. IPv4-mapped IPv6 addresses are reported as IPv4.
pub fn client_ip(request: &Request, trusted_proxies: &[IpAddr]) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical());
    let Some(peer) = peer else {
        return "unknown".to_string();
    };

    if trusted_proxies.contains(&peer) {
        if let Some(forwarded) = forwarded_ip(request.headers()) {
            return forwarded.to_string();
        }
    }
    peer.to_string()
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical())
    };
    header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
}

/// Resolve the session (or restore it from the remember-me cookies) and
/// store the [`SiteContext`] in the request
pub async fn site_context(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let mut ctx = SiteContext::new(&state.site, client_ip(&request, &state.trusted_proxies));
    let mut new_session = None;

    if let Some(token) = cookie_value(request.headers(), SESSION_COOKIE) {
        match state.user_service.validate_session(&token).await {
            Ok(Some(user)) => ctx.authorize(user, token),
            Ok(None) => {}
            Err(e) => tracing::warn!("Session validation failed: {}", e),
        }
    }

    if !ctx.is_session_authorized() {
        let nick = cookie_value(request.headers(), PROFILE_COOKIE);
        let password = cookie_value(request.headers(), PASSWORD_COOKIE);
        if let (Some(nick), Some(password)) = (nick, password) {
            match state.user_service.restore_login(&nick, &password).await {
                Ok(Some((user, session))) => {
                    new_session = Some(session.id.clone());
                    ctx.authorize(user, session.id);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Restoring login of {} failed: {}", nick, e),
            }
        }
    }

    if let Some(user) = &ctx.user {
        ctx.profile = state.user_service.read_profile(&user.nick).await;
    }

    request.extensions_mut().insert(ctx);
    let mut response = next.run(request).await;

    if let Some(session_id) = new_session {
        let cookie = set_cookie(SESSION_COOKIE, &session_id, state.cookie_max_age());
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

// ============================================================================
// Page errors
// ============================================================================

/// Error shown to the visitor through the `error` view
#[derive(Debug, Clone)]
pub struct PageError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl PageError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn access_violation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "ACCESS_VIOLATION", message)
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_INPUT", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Logs the cause; the visitor only sees a generic message
    pub fn internal(e: impl Into<anyhow::Error>) -> Self {
        let e = e.into();
        tracing::error!("Request failed: {:#}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal error")
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.message.clone()).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl From<TopicServiceError> for PageError {
    fn from(e: TopicServiceError) -> Self {
        match e {
            TopicServiceError::AccessViolation(msg) => Self::access_violation(msg),
            TopicServiceError::GroupNotFound(_) | TopicServiceError::NotFound(_) => {
                Self::not_found(e.to_string())
            }
            TopicServiceError::InternalError(inner) => Self::internal(inner),
            TopicServiceError::InvalidTag(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_TAG", e.to_string())
            }
            TopicServiceError::Validation(_)
            | TopicServiceError::BadInput(_)
            | TopicServiceError::BadUrl(_)
            | TopicServiceError::UserNotFound(_) => Self::bad_input(e.to_string()),
        }
    }
}

impl From<PollServiceError> for PageError {
    fn from(e: PollServiceError) -> Self {
        match e {
            PollServiceError::BadVote(msg) => Self::new(StatusCode::BAD_REQUEST, "BAD_VOTE", msg),
            PollServiceError::NotFound(msg) => Self::not_found(format!("Not found: {}", msg)),
            PollServiceError::InternalError(inner) => Self::internal(inner),
        }
    }
}

impl From<BlockError> for PageError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::Blocked(_) => Self::access_violation(e.to_string()),
            BlockError::InvalidAddress(_) | BlockError::ValidationError(_) => {
                Self::bad_input(e.to_string())
            }
            BlockError::InternalError(inner) => Self::internal(inner),
        }
    }
}

impl From<UserServiceError> for PageError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) | UserServiceError::AccessViolation(msg) => {
                Self::access_violation(msg)
            }
            UserServiceError::UserNotFound(_) => Self::access_violation(e.to_string()),
            UserServiceError::ValidationError(_) | UserServiceError::UserExists(_) => {
                Self::bad_input(e.to_string())
            }
            UserServiceError::InternalError(inner) => Self::internal(inner),
        }
    }
}

impl From<TagServiceError> for PageError {
    fn from(e: TagServiceError) -> Self {
        match e {
            TagServiceError::InvalidTag(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_TAG", e.to_string())
            }
            TagServiceError::InternalError(inner) => Self::internal(inner),
        }
    }
}

impl From<GalleryError> for PageError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::InternalError(inner) => Self::internal(inner),
        }
    }
}

/// Replace [`PageError`] responses with the rendered `error` view
pub async fn render_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let site = request
        .extensions()
        .get::<SiteContext>()
        .map(SiteContext::site_vars)
        .unwrap_or_else(|| SiteVars::new(&state.site));

    let mut response = next.run(request).await;
    let Some(error) = response.extensions_mut().remove::<PageError>() else {
        return response;
    };

    let html = state
        .views
        .render_error(error.status.as_u16(), &error.code, &error.message, &site);
    (error.status, Html(html)).into_response()
}

/// `302 Found` redirect
pub fn redirect_found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => PageError::bad_input(format!("Bad redirect target: {}", location)).into_response(),
    }
}

// ============================================================================
// Forms
// ============================================================================

impl From<FormRejection> for PageError {
    fn from(rejection: FormRejection) -> Self {
        Self::bad_input(rejection.body_text())
    }
}

impl From<QueryRejection> for PageError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_input(rejection.body_text())
    }
}

/// Url-encoded request body (or the query string of a GET)
#[derive(Debug, Clone)]
pub struct PageForm<T>(pub T);

impl<T, S> FromRequest<S> for PageForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PageError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Form(value) = Form::<T>::from_request(request, state).await?;
        Ok(Self(value))
    }
}

/// Query string parameters
#[derive(Debug, Clone)]
pub struct PageQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for PageQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PageError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Url-encoded pairs in submission order; used where a key may repeat
pub type FormPairs = Vec<(String, String)>;

/// Every value of `key`, in order
pub fn form_values<'a>(pairs: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    pairs
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

/// First value of `key`
pub fn form_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Every value of `key` as integers
pub fn form_ids(pairs: &[(String, String)], key: &str) -> Result<Vec<i64>, PageError> {
    form_values(pairs, key)
        .into_iter()
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| PageError::bad_input(format!("Bad parameter {}: {}", key, value)))
        })
        .collect()
}

/// `?msgid=N`
#[derive(Debug, Deserialize)]
pub struct MsgidParams {
    pub msgid: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    async fn pairs(body: &'static str) -> FormPairs {
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        PageForm::<FormPairs>::from_request(request, &()).await.unwrap().0
    }

    #[tokio::test]
    async fn test_form_pairs_repeated_keys() {
        let parsed = pairs("vote=3&vote=5&voteid=2&title=Hello+w%C3%B6rld&empty=").await;

        assert_eq!(form_ids(&parsed, "vote").unwrap(), vec![3, 5]);
        assert_eq!(form_value(&parsed, "title"), Some("Hello wörld"));
        assert_eq!(form_value(&parsed, "empty"), Some(""));
        assert!(form_value(&parsed, "missing").is_none());
        assert!(form_ids(&parsed, "missing").unwrap().is_empty());

        let bad = pairs("vote=abc").await;
        assert_eq!(
            form_ids(&bad, "vote").unwrap_err().message,
            "Bad parameter vote: abc"
        );
    }

    #[tokio::test]
    async fn test_page_query_reads_query_with_body_present() {
        let request = Request::builder()
            .method("POST")
            .uri("/add.jsp?msgid=7")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("title=x"))
            .unwrap();
        let (mut parts, _body) = request.into_parts();

        let PageQuery(params) = PageQuery::<MsgidParams>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(params.msgid, 7);
    }

    #[tokio::test]
    async fn test_page_form_rejects_bad_input() {
        let request = Request::builder()
            .method("POST")
            .uri("/commit.jsp")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("msgid=abc"))
            .unwrap();

        let err = PageForm::<MsgidParams>::from_request(request, &())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "BAD_INPUT");
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; profile=J%C3%BCrgen; session="),
        );

        assert_eq!(cookie_value(&headers, "profile").as_deref(), Some("Jürgen"));
        assert_eq!(cookie_value(&headers, "a").as_deref(), Some("1"));
        assert_eq!(cookie_value(&headers, "session"), None);
        assert_eq!(cookie_value(&headers, "password"), None);
    }

    #[test]
    fn test_set_cookie_encodes_value() {
        assert_eq!(
            set_cookie("profile", "Jürgen", 60),
            "profile=J%C3%BCrgen; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
    }

    fn request_from(peer: [u8; 4], headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        request
    }

    #[test]
    fn test_client_ip_ignores_headers_from_untrusted_peers() {
        let spoofed = request_from(
            [192, 0, 2, 9],
            &[("x-forwarded-for", "198.51.100.77"), ("x-real-ip", "198.51.100.78")],
        );
        assert_eq!(client_ip(&spoofed, &[]), "192.0.2.9");

        let other_proxy: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(client_ip(&spoofed, &[other_proxy]), "192.0.2.9");

        let no_peer = Request::builder()
            .header("x-forwarded-for", "198.51.100.77")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&no_peer, &[]), "unknown");
    }

    #[test]
    fn test_client_ip_behind_trusted_proxy() {
        let proxy: IpAddr = "127.0.0.1".parse().unwrap();

        let request = request_from(
            [127, 0, 0, 1],
            &[("x-forwarded-for", "203.0.113.9, 10.0.0.1"), ("x-real-ip", "10.0.0.2")],
        );
        assert_eq!(client_ip(&request, &[proxy]), "203.0.113.9");

        let request = request_from([127, 0, 0, 1], &[("x-real-ip", "::ffff:10.0.0.2")]);
        assert_eq!(client_ip(&request, &[proxy]), "10.0.0.2");

        let request = request_from([127, 0, 0, 1], &[("x-forwarded-for", "garbage")]);
        assert_eq!(client_ip(&request, &[proxy]), "127.0.0.1");
    }

    #[test]
    fn test_flood_key_prefers_session() {
        let mut ctx = SiteContext::new(&SiteConfig::default(), "192.0.2.1".to_string());
        assert_eq!(ctx.flood_key(), "192.0.2.1");
        assert!(ctx.require_user().is_err());

        ctx.authorize(User::new("alice".to_string(), "hash".to_string()), "sid".to_string());
        assert_eq!(ctx.flood_key(), "sid");
        assert!(ctx.require_user().is_ok());
        assert_eq!(
            ctx.require_moderator().unwrap_err().message,
            "Not a moderator"
        );
    }

    #[test]
    fn test_page_error_mapping() {
        let err: PageError = PollServiceError::BadVote("Nothing selected".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "BAD_VOTE");

        let err: PageError = BlockError::Blocked("spam".to_string()).into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.message, "Posting blocked: spam");

        let err: PageError = TopicServiceError::NotFound(9).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: PageError = TopicServiceError::InternalError(anyhow::anyhow!("db gone")).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal error");
    }
}
