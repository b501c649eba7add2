//! Page flows driven through the router

use super::*;
use crate::cache::create_cache;
use crate::config::Config;
use crate::db::{create_test_pool, migrations};
use crate::models::User;
use crate::views::ViewEngine;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use std::net::SocketAddr;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    async fn with_config(config: Config) -> Self {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();

        let state = AppState::new(
            &config,
            pool,
            create_cache(&config.cache),
            ViewEngine::new(None).unwrap(),
        )
        .unwrap();
        let router = build_router(state.clone(), &config.server.cors_origin);
        Self { router, state }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post(&self, uri: &str, body: &str, cookie: Option<&str>) -> Response {
        self.send(form_request(uri, cookie).body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn register(&self, nick: &str, moderator: bool) -> User {
        let user = self
            .state
            .user_service
            .register(nick, "secret", None)
            .await
            .unwrap();
        if moderator {
            self.state.user_service.grant_moderator(user.id).await.unwrap();
        }
        user
    }

    /// Log in through the page; returns the cookie header and the session id
    async fn login(&self, nick: &str) -> (String, String) {
        let response = self
            .post("/login.jsp", &format!("nick={}&passwd=secret", nick), None)
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let session = set_cookies(&response)
            .into_iter()
            .find_map(|c| {
                c.strip_prefix("session=")
                    .and_then(|rest| rest.split(';').next())
                    .map(str::to_string)
            })
            .unwrap();
        (format!("session={}", session), session)
    }

    fn flood_token(&self, key: &str) -> String {
        self.state.topic_service.flood_token(key)
    }

    /// Post a topic as the member owning `session`
    async fn post_topic(&self, cookie: &str, session: &str, fields: &str) -> Response {
        let body = format!("{}&session={}", fields, self.flood_token(session));
        self.post("/add.jsp", &body, Some(cookie)).await
    }
}

fn form_request(uri: &str, cookie: Option<&str>) -> axum::http::request::Builder {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
}

/// Connection from `ip`, as the server's `ConnectInfo` reports it
fn peer(ip: [u8; 4]) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from((ip, 40000)))
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let response = app.get("/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("ok"));
}

#[tokio::test]
async fn test_login_and_logout() {
    let app = TestApp::new().await;
    let alice = app.register("alice", false).await;

    let response = app.post("/login.jsp", "nick=alice&passwd=secret", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "http://localhost:8080/");
    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("session=")));
    assert!(cookies.iter().any(|c| c.starts_with("profile=alice;")));
    let token = app.state.user_service.remember_me_token(&alice);
    assert!(cookies.iter().any(|c| c.starts_with(&format!("password={};", token))));

    let (cookie, _) = app.login("alice").await;
    let page = body_text(app.get("/tags.jsp", Some(&cookie)).await).await;
    assert!(page.contains("alice"));
    assert!(page.contains("logout.jsp"));

    let response = app.get("/logout.jsp", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("session=;") && c.ends_with("Max-Age=0")));

    let page = body_text(app.get("/tags.jsp", Some(&cookie)).await).await;
    assert!(!page.contains("logout.jsp"));
}

#[tokio::test]
async fn test_failed_login_shows_form_again() {
    let app = TestApp::new().await;
    app.register("alice", false).await;

    let response = app.post("/login.jsp", "nick=alice&passwd=wrong", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    let page = body_text(response).await;
    assert!(page.contains("Bad password"));
    assert!(page.contains(r#"name="passwd""#));

    let page = body_text(app.post("/login.jsp", "nick=nobody&passwd=x", None).await).await;
    assert!(page.contains("User not found: nobody"));
}

#[tokio::test]
async fn test_remember_me_restores_session() {
    let app = TestApp::new().await;
    let alice = app.register("alice", false).await;
    let token = app.state.user_service.remember_me_token(&alice);

    let response = app
        .get("/tags.jsp", Some(&format!("profile=alice; password={}", token)))
        .await;
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("session=")));
    assert!(body_text(response).await.contains("alice"));

    let response = app.get("/tags.jsp", Some("profile=alice; password=forged")).await;
    assert!(set_cookies(&response).is_empty());
    assert!(!body_text(response).await.contains("logout.jsp"));
}

#[tokio::test]
async fn test_post_topic_in_unmoderated_group() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;

    let page = body_text(app.get("/add.jsp?group=1", Some(&cookie)).await).await;
    assert!(page.contains(&app.flood_token(&session)));

    let response = app
        .post_topic(
            &cookie,
            &session,
            "group=1&title=Hello&msg=Some+*text*&tags=Linux%2C+Rust",
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("http://localhost:8080/view-message.jsp?msgid=1&nocache="));

    let page = body_text(app.get("/view-message.jsp?msgid=1", None).await).await;
    assert!(page.contains("Hello"));
    assert!(page.contains("<em>text</em>"));
    assert!(page.contains("linux"));
    assert!(page.contains("rust"));

    let cloud = body_text(app.get("/tags.jsp", None).await).await;
    assert!(cloud.contains("linux"));
}

#[tokio::test]
async fn test_moderated_topic_waits_for_commit() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    app.register("boss", true).await;
    let (alice, session) = app.login("alice").await;
    let (boss, _) = app.login("boss").await;

    let response = app
        .post_topic(&alice, &session, "group=2&title=News&msg=Body&tags=linux")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("waiting for a moderator"));
    assert!(page.contains("http://localhost:8080/view-message.jsp?msgid=1"));
    assert!(!body_text(app.get("/tags.jsp", None).await).await.contains("linux"));

    let moderation = body_text(app.get("/moderate.jsp", Some(&boss)).await).await;
    assert!(moderation.contains("News"));

    let response = app.post("/commit.jsp", "msgid=1", Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("Not a moderator"));

    let response = app.post("/commit.jsp", "msgid=1", Some(&boss)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/view-message.jsp?msgid=1");

    assert!(body_text(app.get("/tags.jsp", None).await).await.contains("linux"));
    let moderation = body_text(app.get("/moderate.jsp", Some(&boss)).await).await;
    assert!(moderation.contains("Nothing to approve."));
}

#[tokio::test]
async fn test_form_errors() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;

    // Plain topics get the form back with the message
    let response = app
        .post_topic(&cookie, &session, "group=1&title=Hello&msg=Body&tags=bad%21tag")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Invalid tag"));
    assert!(page.contains(r#"name="title" value="Hello""#));

    // Topics with a poll go to the error page
    let response = app
        .post_topic(
            &cookie,
            &session,
            "group=1&title=Hello&msg=Body&tags=bad%21tag&poll=Yes&poll=No",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let page = body_text(response).await;
    assert!(page.contains("Error 400"));
    assert!(page.contains("Invalid tag"));

    // A token issued for somebody else
    let response = app
        .post("/add.jsp", "group=1&title=Hello&msg=Body&session=forged", Some(&cookie))
        .await;
    assert!(body_text(response).await.contains("Flood protection"));

    assert_eq!(
        app.get("/view-message.jsp?msgid=1", None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_anonymous_posting() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let token = app.flood_token("192.0.2.5");

    let request = |body: String| {
        form_request("/add.jsp", None)
            .extension(peer([192, 0, 2, 5]))
            .body(Body::from(body))
            .unwrap()
    };

    // No session and no credentials: the form comes back with the error
    let response = app
        .send(request(format!("group=1&title=Hi&msg=Body&session={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("User not found: anonymous"));
    assert!(page.contains(r#"name="title" value="Hi""#));

    let response = app
        .send(request(format!(
            "group=1&title=Hi&msg=Body&nick=alice&password=secret&session={}",
            token
        )))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_preview_stores_nothing() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, _) = app.login("alice").await;

    let response = app
        .post(
            "/add.jsp",
            "group=1&title=Draft&msg=Some+**bold**&preview=1",
            Some(&cookie),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains(r#"class="preview""#));
    assert!(page.contains("<strong>bold</strong>"));

    assert_eq!(
        app.get("/view-message.jsp?msgid=1", None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_voting() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;
    let response = app
        .post_topic(&cookie, &session, "group=1&title=Poll&msg=Vote!&poll=Yes&poll=No")
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let response = app.get("/vote-vote.jsp?msgid=1", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("Not authorized"));

    let page = body_text(app.get("/vote-vote.jsp?msgid=1", Some(&cookie)).await).await;
    assert!(page.contains(r#"type="radio" name="vote" value="1""#));
    assert!(page.contains(r#"name="voteid" value="1""#));

    let response = app.post("/vote.jsp", "voteid=1&vote=2", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/view-message.jsp?msgid=1&highlight=2");

    // A second vote changes nothing
    let response = app.post("/vote.jsp", "voteid=1&vote=1", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let page = body_text(
        app.get("/view-message.jsp?msgid=1&highlight=2", None)
            .await,
    )
    .await;
    assert!(page.contains(r#"class="highlight""#));
    assert!(page.contains("<td>Total</td><td>1</td>"));

    let response = app.post("/vote.jsp", "voteid=1", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Nothing selected"));

    let response = app
        .post("/vote.jsp", "voteid=1&vote=1&vote=2", Some(&cookie))
        .await;
    assert!(body_text(response).await.contains("This poll allows only one answer"));

    let response = app.post("/vote.jsp", "voteid=1&vote=2", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_poll_and_topic_redirects() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;
    app.post_topic(&cookie, &session, "group=1&title=Poll&msg=Vote!&poll=Yes&poll=No")
        .await;

    let response = app.get("/view-vote.jsp?vote=1", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/jump-message.jsp?msgid=1");

    let response = app.get("/jump-message.jsp?msgid=1", None).await;
    assert_eq!(location(&response), "/view-message.jsp?msgid=1");

    assert_eq!(
        app.get("/view-vote.jsp?vote=42", None).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get("/view-message.jsp", None).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_gallery_boxlet_follows_commits() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    app.register("boss", true).await;
    let (alice, session) = app.login("alice").await;
    let (boss, _) = app.login("boss").await;

    let response = app
        .post_topic(&alice, &session, "group=3&title=Desk&msg=My+desk&image=g%2Fdesk.jpg")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(app.get("/gallery.boxlet", None).await)
        .await
        .contains("No images yet."));

    app.post("/commit.jsp", "msgid=1", Some(&boss)).await;

    let boxlet = body_text(app.get("/gallery.boxlet", None).await).await;
    assert!(boxlet.contains("desk-med.jpg"));
    assert!(boxlet.contains("/view-message.jsp?msgid=1"));
}

#[tokio::test]
async fn test_ban_blocks_posting() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    app.register("boss", true).await;
    let (alice, session) = app.login("alice").await;
    let (boss, _) = app.login("boss").await;

    let response = app.post("/banip.jsp", "ip=192.0.2.9&reason=spam", Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.post("/banip.jsp", "ip=192.0.2.9&reason=spam", Some(&boss)).await;
    assert_eq!(location(&response), "/moderate.jsp");

    let banned_post = || {
        let body = format!("group=1&title=Hi&msg=Body&session={}", app.flood_token(&session));
        form_request("/add.jsp", Some(&alice))
            .extension(peer([192, 0, 2, 9]))
            .body(Body::from(body))
            .unwrap()
    };

    let response = app.send(banned_post()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("Posting blocked: spam"));

    // A forwarding header from an untrusted peer does not hide the address
    let body = format!("group=1&title=Hi&msg=Body&session={}", app.flood_token(&session));
    let spoofed = form_request("/add.jsp", Some(&alice))
        .header("x-forwarded-for", "198.51.100.77")
        .header("x-real-ip", "198.51.100.78")
        .extension(peer([192, 0, 2, 9]))
        .body(Body::from(body))
        .unwrap();
    assert_eq!(app.send(spoofed).await.status(), StatusCode::FORBIDDEN);

    app.post("/banip.jsp", "ip=192.0.2.9&unban=1", Some(&boss)).await;
    assert_eq!(app.send(banned_post()).await.status(), StatusCode::FOUND);

    let response = app
        .post("/banip.jsp", "ip=192.0.2.9&reason=spam&days=soon", Some(&boss))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_edit_tags() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;
    app.post_topic(&cookie, &session, "group=1&title=Hello&msg=Body&tags=linux")
        .await;

    let response = app.post("/edit-tags.jsp", "msgid=1&tags=rust", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post("/edit-tags.jsp", "msgid=1&tags=rust", Some(&cookie))
        .await;
    assert_eq!(location(&response), "/view-message.jsp?msgid=1");

    let cloud = body_text(app.get("/tags.jsp", None).await).await;
    assert!(cloud.contains("rust"));
    assert!(!cloud.contains("linux"));
}

#[tokio::test]
async fn test_trusted_proxy_reports_client_address() {
    let mut config = Config::default();
    config.server.trusted_proxies = vec!["127.0.0.1".to_string()];
    let app = TestApp::with_config(config).await;
    app.register("alice", false).await;
    let boss = app.register("boss", true).await;
    app.state
        .ip_block_service
        .ban_ip("192.0.2.9", "spam", None, boss.id)
        .await
        .unwrap();
    let (cookie, session) = app.login("alice").await;

    let post = |forwarded_for: &str| {
        let body = format!("group=1&title=Hi&msg=Body&session={}", app.flood_token(&session));
        form_request("/add.jsp", Some(&cookie))
            .header("x-forwarded-for", forwarded_for)
            .extension(peer([127, 0, 0, 1]))
            .body(Body::from(body))
            .unwrap()
    };

    assert_eq!(app.send(post("192.0.2.9")).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.send(post("203.0.113.1")).await.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_group_in_form_action_url() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;

    let body = format!("title=Hello&msg=Body&session={}", app.flood_token(&session));
    let response = app.post("/add.jsp?group=1", &body, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("http://localhost:8080/view-message.jsp?msgid=1&"));

    let response = app
        .post("/add.jsp", "title=Hello&msg=Body", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Missing parameter: group"));

    let response = app.post("/add.jsp?group=x", "title=Hello", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_script_links_in_topics_are_neutralized() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, session) = app.login("alice").await;

    let response = app
        .post_topic(
            &cookie,
            &session,
            "group=1&title=Hi&msg=%5Bclick%5D%28javascript%3Aalert%28document.cookie%29%29",
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let page = body_text(app.get("/view-message.jsp?msgid=1", None).await).await;
    assert!(page.contains("click"));
    assert!(!page.contains("javascript:"));
}

#[tokio::test]
async fn test_pages_are_private() {
    let app = TestApp::new().await;

    for uri in ["/tags.jsp", "/login.jsp", "/view-message.jsp?msgid=99"] {
        let response = app.get(uri, None).await;
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "private",
            "{}",
            uri
        );
    }
}

#[tokio::test]
async fn test_register_then_login() {
    let app = TestApp::new().await;

    let page = body_text(app.get("/register.jsp", None).await).await;
    assert!(page.contains(r#"name="password2""#));

    let response = app
        .post(
            "/register.jsp",
            "nick=carol&password=pw&password2=other&email=",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Passwords do not match"));

    let response = app
        .post("/register.jsp", "nick=anonymous&password=pw&password2=pw", None)
        .await;
    assert!(body_text(response).await.contains("Reserved login name"));

    let response = app
        .post(
            "/register.jsp",
            "nick=carol&password=pw&password2=pw&email=carol%40example.org",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://localhost:8080/login.jsp");

    let response = app.post("/login.jsp", "nick=carol&passwd=pw", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let response = app
        .post("/register.jsp", "nick=carol&password=pw&password2=pw", None)
        .await;
    assert!(body_text(response).await.contains("User already exists: carol"));
}

#[tokio::test]
async fn test_edit_profile() {
    let app = TestApp::new().await;
    app.register("alice", false).await;
    let (cookie, _) = app.login("alice").await;

    assert_eq!(
        app.get("/edit-profile.jsp", None).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.post("/edit-profile.jsp", "style=black", None).await.status(),
        StatusCode::FORBIDDEN
    );

    let page = body_text(app.get("/edit-profile.jsp", Some(&cookie)).await).await;
    assert!(page.contains("default profile"));
    assert!(page.contains("tango/style.css"));

    let response = app.post("/edit-profile.jsp", "style=black", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let page = body_text(app.get("/tags.jsp", Some(&cookie)).await).await;
    assert!(page.contains("black/style.css"));

    let response = app.post("/edit-profile.jsp", "style=neon", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Unknown style"));

    // Visitors without a session keep the default style
    let page = body_text(app.get("/tags.jsp", None).await).await;
    assert!(page.contains("tango/style.css"));
}
