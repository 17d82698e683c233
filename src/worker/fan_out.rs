//! The push/status reconciler.
//!
//! Both kinds do the same thing: find every open pull request bearing any
//! merge or update label and enqueue one `pull_request` work item per
//! number. They stay separate subjects so the substrate can bound retries
//! and deduplicate per kind, not because the logic differs.

use tracing::{debug, error};

use super::error::{FanOutError, ReconcileError};
use super::run::Worker;
use super::session::Session;
use crate::types::{DeliveryId, PullRequestMessage, PushMessage, StatusMessage};

impl Worker {
    pub(crate) async fn run_push(&self, msg: PushMessage) -> Result<(), ReconcileError> {
        let Some(session) = self.session(msg.installation_id, &msg.repository).await? else {
            return Ok(());
        };
        self.fan_out(&session).await
    }

    pub(crate) async fn run_status(&self, msg: StatusMessage) -> Result<(), ReconcileError> {
        let Some(session) = self.session(msg.installation_id, &msg.repository).await? else {
            return Ok(());
        };
        self.fan_out(&session).await
    }

    async fn fan_out(&self, session: &Session) -> Result<(), ReconcileError> {
        let mut labels = session.policy.update.labels.texts();
        labels.extend(session.policy.merge.labels.texts());

        let pull_requests = self
            .github
            .open_pull_requests_with_labels(&session.access_token, &session.repository, &labels)
            .await?;
        if pull_requests.is_empty() {
            debug!("no pull requests available that need action");
            return Ok(());
        }

        let mut failures = Vec::new();
        for pr in pull_requests {
            let msg = PullRequestMessage {
                installation_id: session.installation_id,
                repository: session.repository.clone(),
                pull_request: pr,
            };
            match self
                .queue
                .publish_pull_request(&DeliveryId::synthesize(), &msg)
                .await
            {
                Ok(()) => {
                    debug!(number = pr.number, "published pull_request message");
                }
                Err(err) => {
                    error!(number = pr.number, error = %err, "unable to publish pull_request to queue");
                    failures.push((pr.number, err));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FanOutError { failures }.into())
        }
    }
}
