//! Worker error types.

use async_nats::jetstream::kv;
use std::time::Duration;
use thiserror::Error;

use crate::github::GithubError;
use crate::policy::PolicyError;
use crate::queue::QueueError;

/// Errors from one reconciliation.
///
/// `PushBack` is not a failure: it asks the dispatcher to redeliver after a
/// known wait (post-update cool-down, commit-recency grace) and is not
/// logged as an error.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("pushed back for {delay:?}")]
    PushBack { delay: Duration },

    #[error(transparent)]
    Github(#[from] GithubError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("unable to get entry from kv bucket: {0}")]
    KvRead(#[from] kv::EntryError),

    #[error("unable to store entry in kv bucket: {0}")]
    KvWrite(#[from] kv::PutError),

    #[error("unable to encode cached value: {0}")]
    Cache(#[from] serde_json::Error),

    #[error("deadline exceeded")]
    Timeout,

    #[error(transparent)]
    FanOut(#[from] FanOutError),
}

impl ReconcileError {
    /// The explicit redelivery delay, when this is a push-back.
    pub fn push_back_delay(&self) -> Option<Duration> {
        match self {
            ReconcileError::PushBack { delay } => Some(*delay),
            _ => None,
        }
    }
}

/// Aggregate of per-PR publish failures during fan-out. The handler nacks
/// and the whole fan-out is retried; successfully enqueued children are
/// collapsed by their fingerprints on the retry.
#[derive(Debug, Error)]
#[error("unable to publish pull_request work for {} pull request(s)", .failures.len())]
pub struct FanOutError {
    pub failures: Vec<(i64, QueueError)>,
}

/// Fatal errors that stop the consume loop.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("unable to open message stream: {0}")]
    Subscribe(#[from] async_nats::jetstream::consumer::StreamError),

    #[error("message stream failed: {0}")]
    Messages(#[from] async_nats::jetstream::consumer::pull::MessagesError),
}
