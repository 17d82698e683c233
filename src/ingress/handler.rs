//! Per-event dispatch.
//!
//! Each event kind has its own gate (action, PR state, number) before the
//! shared filters run. Everything that is dropped still answers 200: the
//! host retries on non-2xx and there is nothing to retry.

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::envelope::BaseEnvelope;
use super::{AppState, MAX_BODY_BYTES, respond};
use crate::types::{DeliveryId, PullRequestMessage, PullRequestRef, PushMessage, StatusMessage};

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";

/// Actions on `pull_request` events that warrant reconciliation.
const HANDLED_PR_ACTIONS: [&str; 6] = [
    "created",
    "opened",
    "labeled",
    "reopened",
    "synchronize",
    "edited",
];

/// `POST /` - accept one webhook delivery.
pub async fn receive(State(state): State<AppState>, request: Request) -> Response {
    let event = header(&request, HEADER_EVENT);
    let delivery = match header(&request, HEADER_DELIVERY) {
        s if s.is_empty() => DeliveryId::synthesize(),
        s => DeliveryId::new(s),
    };

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "unable to read body");
            return respond(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    debug!(event = %event, delivery_id = %delivery, "got event");

    match event.as_str() {
        "check_run" => handle_check_run(&state, &delivery, &body).await,
        "pull_request" => handle_pull_request(&state, &delivery, &body).await,
        "pull_request_review" => handle_pull_request_review(&state, &delivery, &body).await,
        "push" => handle_push(&state, &delivery, &body).await,
        "status" => handle_status(&state, &delivery, &body).await,
        _ => respond(StatusCode::OK, "ok"),
    }
}

fn header(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Shared filters: public-only and the repository allowlist.
fn repository_allowed(state: &AppState, envelope: &BaseEnvelope) -> bool {
    if state.allow_only_public_repositories() && envelope.repository.private {
        warn!(repo = %envelope.repository.full_name, "repository is not allowed (it is private)");
        return false;
    }
    if state
        .allowed_repositories()
        .matches_one(&envelope.repository.full_name)
        .is_none()
    {
        warn!(repo = %envelope.repository.full_name, "repository is not allowed");
        return false;
    }
    true
}

async fn handle_check_run(state: &AppState, delivery: &DeliveryId, body: &Bytes) -> Response {
    #[derive(Deserialize)]
    struct CheckRunEvent {
        #[serde(flatten)]
        base: BaseEnvelope,
        #[serde(default)]
        check_run: CheckRunPayload,
    }
    #[derive(Deserialize, Default)]
    struct CheckRunPayload {
        #[serde(default)]
        pull_requests: Vec<NumberOnly>,
        #[serde(default)]
        check_suite: CheckSuitePayload,
    }
    #[derive(Deserialize, Default)]
    struct CheckSuitePayload {
        #[serde(default)]
        pull_requests: Vec<NumberOnly>,
    }
    #[derive(Deserialize, Default)]
    struct NumberOnly {
        #[serde(default)]
        number: i64,
    }

    let event: CheckRunEvent = match serde_json::from_slice(body) {
        Ok(event) => event,
        Err(err) => {
            error!(error = %err, "unable to decode request");
            return respond(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    if !event.base.is_valid() {
        return respond(StatusCode::OK, "ok");
    }
    if event.base.action != "completed" {
        debug!("action is not completed");
        return respond(StatusCode::OK, "ok");
    }
    if !repository_allowed(state, &event.base) {
        return respond(StatusCode::OK, "ok");
    }

    // A run can reference the same PR from both lists; enqueue each once.
    let mut numbers: Vec<i64> = Vec::new();
    for pr in event
        .check_run
        .pull_requests
        .iter()
        .chain(event.check_run.check_suite.pull_requests.iter())
    {
        if pr.number == 0 {
            debug!("no pull request number present in request");
            continue;
        }
        if !numbers.contains(&pr.number) {
            numbers.push(pr.number);
        }
    }

    let repository = event.base.repository();
    for number in numbers {
        let msg = PullRequestMessage {
            installation_id: event.base.installation.id,
            repository: repository.clone(),
            pull_request: PullRequestRef { number },
        };
        if let Err(err) = state.queue().publish_pull_request(delivery, &msg).await {
            error!(error = %err, number, "unable to queue message");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, "error");
        }
    }
    respond(StatusCode::OK, "ok")
}

#[derive(Deserialize)]
struct PullRequestEvent {
    #[serde(flatten)]
    base: BaseEnvelope,
    #[serde(default)]
    pull_request: PullRequestPayload,
}

#[derive(Deserialize, Default)]
struct PullRequestPayload {
    #[serde(default)]
    number: i64,
    #[serde(default)]
    state: String,
}

/// Gates shared by `pull_request` and `pull_request_review` events.
/// Returns the event when the PR itself qualifies for reconciliation.
fn decode_open_pull_request(body: &Bytes) -> Result<Option<PullRequestEvent>, serde_json::Error> {
    let event: PullRequestEvent = serde_json::from_slice(body)?;

    if !event.base.is_valid() {
        return Ok(None);
    }
    if event.pull_request.number == 0 {
        debug!("no pull_request.number present in request");
        return Ok(None);
    }
    if event.pull_request.state.is_empty() {
        debug!("no pull_request.state present in request");
        return Ok(None);
    }
    if event.pull_request.state != "open" {
        debug!("pull_request.state is not `open'");
        return Ok(None);
    }
    Ok(Some(event))
}

async fn enqueue_pull_request(
    state: &AppState,
    delivery: &DeliveryId,
    event: &PullRequestEvent,
) -> Response {
    let msg = PullRequestMessage {
        installation_id: event.base.installation.id,
        repository: event.base.repository(),
        pull_request: PullRequestRef {
            number: event.pull_request.number,
        },
    };
    if let Err(err) = state.queue().publish_pull_request(delivery, &msg).await {
        error!(error = %err, "unable to queue pull_request message");
        return respond(StatusCode::INTERNAL_SERVER_ERROR, "error");
    }
    respond(StatusCode::OK, "ok")
}

async fn handle_pull_request(state: &AppState, delivery: &DeliveryId, body: &Bytes) -> Response {
    let event = match decode_open_pull_request(body) {
        Ok(Some(event)) => event,
        Ok(None) => return respond(StatusCode::OK, "ok"),
        Err(err) => {
            error!(error = %err, "unable to decode request");
            return respond(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    if !HANDLED_PR_ACTIONS.contains(&event.base.action.as_str()) {
        debug!(
            "action is not one of {}",
            HANDLED_PR_ACTIONS.join(", ")
        );
        return respond(StatusCode::OK, "ok");
    }
    if !repository_allowed(state, &event.base) {
        return respond(StatusCode::OK, "ok");
    }
    enqueue_pull_request(state, delivery, &event).await
}

async fn handle_pull_request_review(
    state: &AppState,
    delivery: &DeliveryId,
    body: &Bytes,
) -> Response {
    let event = match decode_open_pull_request(body) {
        Ok(Some(event)) => event,
        Ok(None) => return respond(StatusCode::OK, "ok"),
        Err(err) => {
            error!(error = %err, "unable to decode request");
            return respond(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    if event.base.action != "submitted" {
        debug!("action is not submitted");
        return respond(StatusCode::OK, "ok");
    }
    if !repository_allowed(state, &event.base) {
        return respond(StatusCode::OK, "ok");
    }
    enqueue_pull_request(state, delivery, &event).await
}

async fn handle_push(state: &AppState, delivery: &DeliveryId, body: &Bytes) -> Response {
    let envelope: BaseEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(error = %err, "unable to decode request");
            return respond(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    if !envelope.is_valid() {
        return respond(StatusCode::OK, "ok");
    }
    if !repository_allowed(state, &envelope) {
        return respond(StatusCode::OK, "ok");
    }

    let msg = PushMessage {
        installation_id: envelope.installation.id,
        repository: envelope.repository(),
    };
    if let Err(err) = state.queue().publish_push(delivery, &msg).await {
        error!(error = %err, "unable to queue push message");
        return respond(StatusCode::INTERNAL_SERVER_ERROR, "error");
    }
    respond(StatusCode::OK, "ok")
}

async fn handle_status(state: &AppState, delivery: &DeliveryId, body: &Bytes) -> Response {
    let envelope: BaseEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(error = %err, "unable to decode request");
            return respond(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    if !envelope.is_valid() {
        return respond(StatusCode::OK, "ok");
    }
    if !repository_allowed(state, &envelope) {
        return respond(StatusCode::OK, "ok");
    }

    let msg = StatusMessage {
        installation_id: envelope.installation.id,
        repository: envelope.repository(),
    };
    if let Err(err) = state.queue().publish_status(delivery, &msg).await {
        error!(error = %err, "unable to queue status message");
        return respond(StatusCode::INTERNAL_SERVER_ERROR, "error");
    }
    respond(StatusCode::OK, "ok")
}
