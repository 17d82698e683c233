//! Subscription pumps, the selector loop, and the uniform message envelope.

use async_nats::jetstream::consumer::pull::MessagesError;
use async_nats::jetstream::{self, AckKind};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::check_runs::CheckRuns;
use super::error::{ConsumeError, ReconcileError};
use super::policies::Policies;
use super::tokens::AccessTokens;
use crate::github::GithubClient;
use crate::matcher::PatternList;
use crate::queue::{DelayCheck, SubjectConsumer, WorkQueue, delay_check};
use crate::types::WorkMessage;

/// Per-kind reconciliation deadlines.
const MAX_PUSH_DURATION: Duration = Duration::from_secs(60);
const MAX_STATUS_DURATION: Duration = Duration::from_secs(60);
const MAX_PULL_REQUEST_DURATION: Duration = Duration::from_secs(60);

/// The three durable subscriptions the worker consumes.
pub struct SubjectConsumers {
    pub push: SubjectConsumer,
    pub status: SubjectConsumer,
    pub pull_request: SubjectConsumer,
}

/// The queue consumer process.
pub struct Worker {
    pub(crate) github: GithubClient,
    pub(crate) queue: WorkQueue,
    pub(crate) tokens: AccessTokens,
    pub(crate) policies: Policies,
    pub(crate) check_runs: CheckRuns,
    pub(crate) allowed_repositories: PatternList,
    pub(crate) allow_only_public_repositories: bool,
    pub(crate) retry_wait: Duration,
    pub(crate) duration_to_wait_after_update_branch: Duration,
    pub(crate) message_channel_size: usize,
}

/// Construction parameters for [`Worker`].
pub struct WorkerParts {
    pub github: GithubClient,
    pub queue: WorkQueue,
    pub tokens: AccessTokens,
    pub policies: Policies,
    pub check_runs: CheckRuns,
    pub allowed_repositories: PatternList,
    pub allow_only_public_repositories: bool,
    pub retry_wait: Duration,
    pub duration_to_wait_after_update_branch: Duration,
    pub message_channel_size: usize,
}

impl Worker {
    pub fn new(parts: WorkerParts) -> Self {
        Worker {
            github: parts.github,
            queue: parts.queue,
            tokens: parts.tokens,
            policies: parts.policies,
            check_runs: parts.check_runs,
            allowed_repositories: parts.allowed_repositories,
            allow_only_public_repositories: parts.allow_only_public_repositories,
            retry_wait: parts.retry_wait,
            duration_to_wait_after_update_branch: parts.duration_to_wait_after_update_branch,
            message_channel_size: parts.message_channel_size,
        }
    }

    /// Pumps messages from the three subscriptions into bounded channels
    /// and dispatches them until shutdown or a subscription failure.
    ///
    /// The channels are the back-pressure knob: when one fills up, its pump
    /// blocks, which stops pulling from the subscription, which stops the
    /// substrate from delivering.
    pub async fn consume(
        &self,
        consumers: SubjectConsumers,
        shutdown: CancellationToken,
    ) -> Result<(), ConsumeError> {
        let push_messages = consumers.push.messages().await?;
        let status_messages = consumers.status.messages().await?;
        let pull_request_messages = consumers.pull_request.messages().await?;

        let (err_tx, mut err_rx) = mpsc::channel::<ConsumeError>(1);
        let (push_tx, mut push_rx) = mpsc::channel(self.message_channel_size);
        let (status_tx, mut status_rx) = mpsc::channel(self.message_channel_size);
        let (pull_request_tx, mut pull_request_rx) = mpsc::channel(self.message_channel_size);

        let pumps = [
            spawn_pump(push_messages, push_tx, err_tx.clone()),
            spawn_pump(status_messages, status_tx, err_tx.clone()),
            spawn_pump(pull_request_messages, pull_request_tx, err_tx),
        ];

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("close signal received");
                    break Ok(());
                }
                Some(msg) = push_rx.recv() => {
                    debug!("push message received");
                    self.handle_message(msg, MAX_PUSH_DURATION, |m| self.run_push(m)).await;
                }
                Some(msg) = status_rx.recv() => {
                    debug!("status message received");
                    self.handle_message(msg, MAX_STATUS_DURATION, |m| self.run_status(m)).await;
                }
                Some(msg) = pull_request_rx.recv() => {
                    debug!("pull_request message received");
                    self.handle_message(msg, MAX_PULL_REQUEST_DURATION, |m| self.run_pull_request(m)).await;
                }
                Some(err) = err_rx.recv() => break Err(err),
            }
        };

        for pump in pumps {
            pump.abort();
        }
        result
    }

    /// The uniform envelope around every reconciler:
    /// delay check, decode, re-filter, deadline, ack/nack.
    async fn handle_message<T, F, Fut>(&self, msg: jetstream::Message, deadline: Duration, run: F)
    where
        T: DeserializeOwned + WorkMessage,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(), ReconcileError>>,
    {
        match delay_check(msg.headers.as_ref(), Utc::now()) {
            DelayCheck::Ready => {}
            DelayCheck::Delay(remaining) => {
                debug!("message not yet ready");
                nak(&msg, Some(remaining)).await;
                return;
            }
            DelayCheck::Invalid => {
                error!("unable to parse delay until header");
                nak(&msg, None).await;
                return;
            }
        }

        let decoded: T = match serde_json::from_slice(&msg.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                error!(error = %err, "unable to decode queue message");
                nak(&msg, Some(self.retry_wait)).await;
                return;
            }
        };

        // The ingress already filtered; this is the safety net for stale
        // queue contents after a configuration change.
        let repository = decoded.repository();
        if self.allow_only_public_repositories && repository.private {
            warn!(repo = %repository.full_name, "repository is not allowed (it is private)");
            ack(&msg).await;
            return;
        }
        if self
            .allowed_repositories
            .matches_one(&repository.full_name)
            .is_none()
        {
            warn!(repo = %repository.full_name, "repository is not allowed");
            ack(&msg).await;
            return;
        }

        let result = match tokio::time::timeout(deadline, run(decoded)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::Timeout),
        };

        match result {
            Ok(()) => ack(&msg).await,
            Err(err) => {
                let delay = match err.push_back_delay() {
                    Some(delay) => delay,
                    None => {
                        error!(error = %err, "error");
                        self.retry_wait
                    }
                };
                nak(&msg, Some(delay)).await;
            }
        }
    }
}

fn spawn_pump<S>(
    mut messages: S,
    tx: mpsc::Sender<jetstream::Message>,
    err_tx: mpsc::Sender<ConsumeError>,
) -> JoinHandle<()>
where
    S: Stream<Item = Result<jetstream::Message, MessagesError>> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = messages.next().await {
            match item {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = err_tx.send(err.into()).await;
                    return;
                }
            }
        }
    })
}

async fn ack(msg: &jetstream::Message) {
    if let Err(err) = msg.ack().await {
        error!(error = %err, "unable to ack message");
    }
}

async fn nak(msg: &jetstream::Message, delay: Option<Duration>) {
    if let Err(err) = msg.ack_with(AckKind::Nak(delay)).await {
        error!(error = %err, "unable to nak message");
    }
}
