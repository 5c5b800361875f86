//! Public HTML pages rendered through the theme engine
//!
//! - GET / - Home content sections and the latest posts
//! - GET /blog?page=
//! - GET /blog/{slug}
//! - GET /faq
//! - GET /p/{slug} - Published page plus its content sections
//! - GET /unsubscribe?token= - Confirmation page for the link in emails
//! - POST /unsubscribe - Form submit that spends the token
//!
//! Anything else falls through to the themed 404 page.

use axum::{
    extract::{Form, Path, Query, State},
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tera::Context;

use crate::api::middleware::AppState;
use crate::api::responses::PageQuery;
use crate::models::{Faq, ListParams};
use crate::services::blog::BlogServiceError;
use crate::services::content::ContentServiceError;
use crate::services::markdown::MarkdownRenderer;
use crate::services::newsletter::NewsletterServiceError;

const HOME_PAGE_SLUG: &str = "home";
const HOME_POST_COUNT: u32 = 5;

/// `?token=` on the link, `token` field on the form
#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
struct FaqView {
    slug: String,
    question: String,
    category: Option<String>,
    answer_html: String,
}

impl FaqView {
    fn new(faq: Faq, renderer: &MarkdownRenderer) -> Self {
        Self {
            answer_html: renderer.render(&faq.answer),
            slug: faq.slug,
            question: faq.question,
            category: faq.category,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/blog", get(blog_list))
        .route("/blog/{slug}", get(blog_post))
        .route("/faq", get(faq))
        .route("/p/{slug}", get(page))
        .route("/unsubscribe", get(confirm_unsubscribe).post(unsubscribe))
}

fn render(state: &AppState, template: &str, context: Context, path: &str) -> Response {
    match state.theme.render_page(template, context, path) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

fn not_found(state: &AppState, path: &str, message: Option<&str>) -> Response {
    let mut context = Context::new();
    if let Some(message) = message {
        context.insert("message", message);
    }
    let mut response = render(state, "not_found.html", context, path);
    if response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NOT_FOUND;
    }
    response
}

fn server_error(cause: impl std::fmt::Display) -> Response {
    tracing::error!("Failed to load page data: {}", cause);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

async fn home(State(state): State<AppState>) -> Response {
    let posts = match state
        .blog_service
        .list_published(ListParams::new(1, HOME_POST_COUNT), None)
        .await
    {
        Ok(result) => result.items,
        Err(e) => return server_error(e),
    };
    let sections = match state.section_service.list_for_page(HOME_PAGE_SLUG).await {
        Ok(sections) => sections,
        Err(e) => return server_error(e),
    };

    let mut context = Context::new();
    context.insert("posts", &posts);
    context.insert("sections", &sections);
    render(&state, "index.html", context, "/")
}

async fn blog_list(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Response {
    let result = match state
        .blog_service
        .list_published(query.params(), None)
        .await
    {
        Ok(result) => result,
        Err(e) => return server_error(e),
    };

    let mut context = Context::new();
    context.insert("has_next", &result.has_next());
    context.insert("result", &result);
    render(&state, "blog_list.html", context, "/blog")
}

async fn blog_post(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    let path = format!("/blog/{}", slug);
    match state.blog_service.get_published_by_slug(&slug).await {
        Ok(post) => {
            let mut context = Context::new();
            context.insert("post", &post);
            render(&state, "blog_post.html", context, &path)
        }
        Err(BlogServiceError::NotFound(_)) => not_found(&state, &path, None),
        Err(e) => server_error(e),
    }
}

async fn faq(State(state): State<AppState>) -> Response {
    let faqs = match state.faq_service.list_published(None).await {
        Ok(faqs) => faqs,
        Err(e) => return server_error(e),
    };
    let renderer = MarkdownRenderer::new();
    let faqs: Vec<FaqView> = faqs
        .into_iter()
        .map(|faq| FaqView::new(faq, &renderer))
        .collect();

    let mut context = Context::new();
    context.insert("faqs", &faqs);
    render(&state, "faq.html", context, "/faq")
}

async fn page(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    let path = format!("/p/{}", slug);
    let page = match state.page_service.get_published_by_slug(&slug).await {
        Ok(page) => page,
        Err(ContentServiceError::NotFound(_)) => return not_found(&state, &path, None),
        Err(e) => return server_error(e),
    };
    let sections = match state.section_service.list_for_page(&page.slug).await {
        Ok(sections) => sections,
        Err(e) => return server_error(e),
    };

    let mut context = Context::new();
    context.insert("page", &page);
    context.insert("sections", &sections);
    render(&state, "page.html", context, &path)
}

const INVALID_UNSUBSCRIBE: &str = "This unsubscribe link is invalid or has already been used.";

fn unsubscribe_page(state: &AppState, context: Context, status: StatusCode) -> Response {
    let mut response = render(state, "unsubscribe.html", context, "/unsubscribe");
    if response.status() == StatusCode::OK {
        *response.status_mut() = status;
    }
    response
}

/// Link scanners follow GET links, so the link only asks for confirmation
async fn confirm_unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> Response {
    let token = query.token.trim();
    let mut context = Context::new();
    context.insert("success", &false);
    if token.is_empty() {
        context.insert("confirm", &false);
        context.insert("message", INVALID_UNSUBSCRIBE);
        return unsubscribe_page(&state, context, StatusCode::NOT_FOUND);
    }

    context.insert("confirm", &true);
    context.insert("token", token);
    unsubscribe_page(&state, context, StatusCode::OK)
}

async fn unsubscribe(
    State(state): State<AppState>,
    Form(form): Form<UnsubscribeQuery>,
) -> Response {
    let mut context = Context::new();
    context.insert("confirm", &false);
    let status = match state.newsletter_service.unsubscribe(&form.token).await {
        Ok(subscriber) => {
            context.insert("success", &true);
            context.insert("email", &subscriber.email);
            StatusCode::OK
        }
        Err(NewsletterServiceError::NotFound(_)) => {
            context.insert("success", &false);
            context.insert("message", INVALID_UNSUBSCRIBE);
            StatusCode::NOT_FOUND
        }
        Err(e) => return server_error(e),
    };
    unsubscribe_page(&state, context, status)
}

/// Router fallback for unknown paths
pub async fn fallback(State(state): State<AppState>, uri: Uri) -> Response {
    not_found(&state, uri.path(), None)
}
