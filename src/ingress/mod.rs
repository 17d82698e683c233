//! Webhook ingress.
//!
//! Accepts GitHub webhook deliveries on `POST /`, validates a minimum
//! envelope, applies the repository allowlist, and publishes one normalized
//! work item per logical trigger. Everything else about the HTTP surface is
//! deliberately boring: non-POST requests are redirected to the project
//! page, unknown paths get a JSON 404, and every response body is
//! `{"status": "..."}`.

mod envelope;
mod handler;

pub use envelope::BaseEnvelope;
pub use handler::receive;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::post;
use serde_json::json;
use std::sync::Arc;

use crate::matcher::PatternList;
use crate::queue::WorkQueue;

/// Where non-POST requests to `/` are sent.
const PROJECT_URL: &str = "https://github.com/merge-pilot/merge-pilot";

/// Webhook bodies are read up to this many bytes.
pub const MAX_BODY_BYTES: usize = 1024 * 1024 * 16;

/// Shared ingress state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    queue: WorkQueue,
    allowed_repositories: PatternList,
    allow_only_public_repositories: bool,
}

impl AppState {
    pub fn new(
        queue: WorkQueue,
        allowed_repositories: PatternList,
        allow_only_public_repositories: bool,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                queue,
                allowed_repositories,
                allow_only_public_repositories,
            }),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.inner.queue
    }

    pub fn allowed_repositories(&self) -> &PatternList {
        &self.inner.allowed_repositories
    }

    pub fn allow_only_public_repositories(&self) -> bool {
        self.inner.allow_only_public_repositories
    }
}

/// Builds the ingress router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(receive).fallback(redirect_to_project))
        .fallback(not_found)
        .with_state(state)
}

async fn redirect_to_project() -> Redirect {
    Redirect::temporary(PROJECT_URL)
}

async fn not_found() -> Response {
    respond(StatusCode::NOT_FOUND, "not found")
}

/// The uniform `{"status": "..."}` response body.
pub(crate) fn respond(status: StatusCode, word: &str) -> Response {
    (status, axum::Json(json!({ "status": word }))).into_response()
}
