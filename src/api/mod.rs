//! API layer - HTTP handlers and routing
//!
//! - `/api/**` JSON endpoints, rate limited per client IP
//! - `/api/admin/**` behind a session; newsletter, automation and scheduler
//!   additionally need the admin role
//! - Public HTML pages rendered by the theme engine

pub mod ai;
pub mod auth;
pub mod automation;
pub mod blog;
pub mod content;
pub mod health;
pub mod middleware;
pub mod newsletter;
pub mod responses;
pub mod scheduler;
pub mod social;
pub mod web;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState};

/// Build the `/api` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin role only
    let admin_only = Router::new()
        .nest("/newsletter", newsletter::admin_router())
        .nest("/automation", automation::admin_router())
        .nest("/scheduler", scheduler::admin_router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin));

    // Any signed-in user
    let admin_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/blog", blog::admin_router())
        .nest("/social", social::admin_router())
        .nest("/faqs", content::faq_admin_router())
        .nest("/pages", content::page_admin_router())
        .nest("/content-sections", content::section_admin_router())
        .nest("/ai", ai::admin_router())
        .merge(admin_only)
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health::health))
        .nest("/blog", blog::public_router())
        .nest("/faqs", content::faq_public_router())
        .nest("/pages", content::page_public_router())
        .nest("/content", content::section_public_router())
        .nest("/newsletter", newsletter::public_router())
        .nest("/cron", scheduler::cron_router())
        .nest("/auth", auth::public_router())
        .nest("/admin", admin_routes)
        .fallback(api_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::rate_limit,
        ))
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

/// `*` allows any origin without cookies; anything else is an exact origin
/// with credentials.
fn cors_layer(origin: &str) -> Option<CorsLayer> {
    let origin = origin.trim();
    if origin.is_empty() {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE]);

    if origin == "*" {
        return Some(layer.allow_origin(Any));
    }

    match origin.parse::<HeaderValue>() {
        Ok(value) => Some(layer.allow_origin(value).allow_credentials(true)),
        Err(e) => {
            tracing::warn!(origin, "Ignoring invalid CORS origin: {}", e);
            None
        }
    }
}

/// Build the complete application router
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .nest("/api", build_api_router(state.clone()))
        .merge(web::router())
        .fallback(web::fallback);

    let router = match cors_layer(&state.config.server.cors_origin) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::models::SubscribeInput;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tokio_test::assert_ok;

    const ADMIN_PASSWORD: &str = "correct-horse-battery";

    async fn server_with(config: Config) -> (TestServer, AppState) {
        let pool = migrated_pool().await;
        let mut config = config;
        config.admin.username = Some("admin".to_string());
        config.admin.email = Some("admin@example.com".to_string());
        config.admin.password = Some(ADMIN_PASSWORD.to_string());

        let state = assert_ok!(AppState::new(config, pool));
        let admin = assert_ok!(state.auth_service.bootstrap_admin(&state.config.admin).await);
        assert!(admin.is_some());
        let server = TestServer::new(build_router(state.clone())).unwrap();
        (server, state)
    }

    async fn server() -> TestServer {
        server_with(Config::default()).await.0
    }

    async fn login(server: &TestServer) -> String {
        let response = server
            .post("/api/auth/login")
            .json(&json!({ "username": "admin", "password": ADMIN_PASSWORD }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["data"]["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_reports_database() {
        let server = server().await;
        let response = server.get("/api/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["database"], "ok");
        assert_eq!(body["data"]["scheduler_running"], false);
    }

    #[tokio::test]
    async fn test_login_me_logout() {
        let server = server().await;
        let token = login(&server).await;

        let me = server.get("/api/admin/auth/me").authorization_bearer(&token).await;
        me.assert_status_ok();
        assert_eq!(me.json::<Value>()["data"]["username"], "admin");

        server
            .post("/api/admin/auth/logout")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();

        server
            .get("/api/admin/auth/me")
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let server = server().await;
        let response = server
            .post("/api/auth/login")
            .json(&json!({ "username": "admin", "password": "nope" }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["success"], false);
    }

    #[tokio::test]
    async fn test_admin_routes_require_session() {
        let server = server().await;
        let response = server.get("/api/admin/blog").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_published_post_is_public() {
        let server = server().await;
        let token = login(&server).await;

        let created = server
            .post("/api/admin/blog")
            .authorization_bearer(&token)
            .json(&json!({ "title": "Launch Day", "content": "We **shipped**." }))
            .await;
        created.assert_status(StatusCode::CREATED);
        let created: Value = created.json();
        let id = created["data"]["id"].as_i64().unwrap();
        let slug = created["data"]["slug"].as_str().unwrap().to_string();

        server
            .get(&format!("/api/blog/{}", slug))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        server
            .post(&format!("/api/admin/blog/{}/publish", id))
            .authorization_bearer(&token)
            .await
            .assert_status_ok();

        let post = server.get(&format!("/api/blog/{}", slug)).await;
        post.assert_status_ok();
        assert!(post.json::<Value>()["data"]["content_html"]
            .as_str()
            .unwrap()
            .contains("<strong>shipped</strong>"));

        let list: Value = server.get("/api/blog?page=1&page_size=5").await.json();
        assert_eq!(list["data"]["total"], 1);

        let html = server.get(&format!("/blog/{}", slug)).await;
        html.assert_status_ok();
        assert!(html.text().contains("Launch Day"));
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe() {
        let (server, state) = server_with(Config::default()).await;

        let response = server
            .post("/api/newsletter/subscribe")
            .json(&json!({ "email": "Reader@Example.com" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["data"]["outcome"], "created");
        assert_eq!(body["data"]["subscriber"]["email"], "reader@example.com");

        let again = server
            .post("/api/newsletter/subscribe")
            .json(&json!({ "email": "reader@example.com" }))
            .await;
        again.assert_status_ok();
        assert_eq!(again.json::<Value>()["data"]["outcome"], "already_subscribed");

        let id = body["data"]["subscriber"]["id"].as_i64().unwrap();
        let token = state
            .newsletter_service
            .get_subscriber(id)
            .await
            .unwrap()
            .unsubscribe_token
            .unwrap();

        server
            .post("/api/newsletter/unsubscribe")
            .json(&json!({ "token": token }))
            .await
            .assert_status_ok();

        let reused = server
            .post("/api/newsletter/unsubscribe")
            .json(&json!({ "token": token }))
            .await;
        reused.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(reused.json::<Value>()["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unsubscribe_link_asks_before_unsubscribing() {
        let (server, state) = server_with(Config::default()).await;
        let (subscriber, _) = state
            .newsletter_service
            .subscribe(SubscribeInput {
                email: "reader@example.com".into(),
                name: None,
                source: None,
            })
            .await
            .unwrap();
        let token = subscriber.unsubscribe_token.clone().unwrap();

        // Following the link twice changes nothing
        for _ in 0..2 {
            let page = server.get(&format!("/unsubscribe?token={}", token)).await;
            page.assert_status_ok();
            let html = page.text();
            assert!(html.contains("method=\"post\""));
            assert!(html.contains(&token));
        }
        let stored = state.newsletter_service.get_subscriber(subscriber.id).await.unwrap();
        assert!(stored.is_active());

        let done = server
            .post("/unsubscribe")
            .form(&[("token", token.as_str())])
            .await;
        done.assert_status_ok();
        assert!(done.text().contains("reader@example.com"));
        let stored = state.newsletter_service.get_subscriber(subscriber.id).await.unwrap();
        assert!(!stored.is_active());

        server
            .post("/unsubscribe")
            .form(&[("token", token.as_str())])
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/unsubscribe")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_email_is_rejected() {
        let server = server().await;
        let response = server
            .post("/api/newsletter/subscribe")
            .json(&json!({ "email": "not-an-email" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_cron_trigger_disabled_without_secret() {
        let server = server().await;
        server
            .post("/api/cron/scheduler")
            .authorization_bearer("anything")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cron_trigger_checks_secret() {
        let mut config = Config::default();
        config.scheduler.cron_secret = Some("s3cret".to_string());
        let (server, _) = server_with(config).await;

        server
            .post("/api/cron/scheduler")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .post("/api/cron/scheduler")
            .authorization_bearer("wrong")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let response = server
            .post("/api/cron/scheduler")
            .authorization_bearer("s3cret")
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["data"]["skipped"], false);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let mut config = Config::default();
        config.rate_limit.requests_per_window = 2;
        let (server, _) = server_with(config).await;

        server.get("/api/health").await.assert_status_ok();
        server.get("/api/health").await.assert_status_ok();

        let limited = server.get("/api/health").await;
        limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert!(!limited.header("retry-after").is_empty());
        assert_eq!(limited.json::<Value>()["error"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_scheduler_status_for_admin() {
        let server = server().await;
        let token = login(&server).await;

        let response = server
            .get("/api/admin/scheduler/status")
            .authorization_bearer(&token)
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["running"], false);
        assert_eq!(body["data"]["max_retries"], 3);
    }

    #[tokio::test]
    async fn test_unknown_paths() {
        let server = server().await;

        let api = server.get("/api/nope").await;
        api.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(api.json::<Value>()["error"], "NOT_FOUND");

        let html = server.get("/nope").await;
        html.assert_status(StatusCode::NOT_FOUND);
        assert!(html.text().contains("Page not found"));
    }

    #[test]
    fn test_cors_layer_variants() {
        assert!(cors_layer("").is_none());
        assert!(cors_layer("*").is_some());
        assert!(cors_layer("https://acme.test").is_some());
        assert!(cors_layer("bad\norigin").is_none());
    }
}
