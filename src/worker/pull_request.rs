//! The per-PR state machine.
//!
//! Fetch a fresh snapshot, update the branch if asked, merge if asked,
//! delete the branch if configured. Every observable outcome is surfaced
//! through the check-run manager; deferrals are expressed as push-back
//! errors so the dispatcher can schedule the redelivery.

use tracing::{debug, info};

use super::error::ReconcileError;
use super::run::Worker;
use super::session::Session;
use super::skip::{should_skip_merge, should_skip_update};
use crate::github::{GithubError, LastCommit, PullRequestDetails};
use crate::types::PullRequestMessage;

impl Worker {
    pub(crate) async fn run_pull_request(
        &self,
        msg: PullRequestMessage,
    ) -> Result<(), ReconcileError> {
        let Some(session) = self.session(msg.installation_id, &msg.repository).await? else {
            return Ok(());
        };

        let details = self
            .github
            .pull_request_details(
                &session.access_token,
                &msg.repository,
                msg.pull_request.number,
            )
            .await?;

        if details.state != "OPEN" {
            debug!("pull request is not open anymore");
            return Ok(());
        }
        let Some(last_commit) = details.last_commit.clone() else {
            debug!("pull request did not contain commits");
            return Ok(());
        };

        let (stop, did_update) = self
            .update_pull_request(&session, &details, &last_commit)
            .await?;
        if stop {
            return Ok(());
        }

        if did_update
            && session
                .policy
                .merge
                .labels
                .matches_any(&details.labels)
                .is_some()
        {
            debug!("not merging, because pull request was just updated");
            return Err(ReconcileError::PushBack {
                delay: self.duration_to_wait_after_update_branch,
            });
        }

        let (stop, did_merge) = self
            .merge_pull_request(&session, &details, &last_commit)
            .await?;
        if stop {
            return Ok(());
        }

        if did_merge && session.policy.merge.delete_branch {
            info!(branch = %details.head_ref_name, "deleting branch");
            self.github
                .delete_ref(&session.access_token, &details.head_ref_id)
                .await?;
        }
        Ok(())
    }

    /// The update half. Returns (stop, did_update).
    async fn update_pull_request(
        &self,
        session: &Session,
        details: &PullRequestDetails,
        last_commit: &LastCommit,
    ) -> Result<(bool, bool), ReconcileError> {
        let update = &session.policy.update;
        if update.labels.is_empty() || update.labels.matches_any(&details.labels).is_none() {
            return Ok((false, false));
        }

        if details.ahead_by == 0 {
            return Ok((false, false));
        }

        if details.has_conflicts {
            info!("not updating: pull request has conflicts");
            self.surface(session, details, last_commit, "not updating: pull request has conflicts", "")
                .await?;
            return Ok((true, false));
        }

        if let Some(skip) = should_skip_update(update, details) {
            self.surface(session, details, last_commit, &skip.title, &skip.summary)
                .await?;
            return Ok((true, false));
        }

        info!("updating pull request");
        self.surface(session, details, last_commit, "updating", "")
            .await?;

        match self
            .github
            .update_pull_request_branch(&session.access_token, &details.id, &last_commit.sha)
            .await
        {
            Ok(()) => {}
            Err(GithubError::GraphQL(errors)) => {
                self.surface(session, details, last_commit, "error during update", &errors.to_string())
                    .await?;
                return Err(GithubError::GraphQL(errors).into());
            }
            Err(err) => return Err(err.into()),
        }

        self.surface(session, details, last_commit, "updated", "")
            .await?;
        Ok((false, true))
    }

    /// The merge half. Returns (stop, did_merge).
    async fn merge_pull_request(
        &self,
        session: &Session,
        details: &PullRequestDetails,
        last_commit: &LastCommit,
    ) -> Result<(bool, bool), ReconcileError> {
        let merge = &session.policy.merge;
        if merge.labels.matches_any(&details.labels).is_none() {
            return Ok((false, false));
        }

        if !details.is_mergeable {
            debug!("pull request not mergeable");
            self.surface(session, details, last_commit, "not merging: pull request is not mergeable", "")
                .await?;
            return Ok((true, false));
        }

        if let Some(skip) = should_skip_merge(
            merge,
            details,
            chrono::Utc::now(),
            self.duration_to_wait_after_update_branch,
        )? {
            self.surface(session, details, last_commit, &skip.title, &skip.summary)
                .await?;
            return Ok((true, false));
        }

        info!("merging pull request");
        self.surface(
            session,
            details,
            last_commit,
            &format!(
                "merging {} into {}",
                details.head_ref_name, details.base_ref_name
            ),
            "",
        )
        .await?;

        match self
            .github
            .merge_pull_request(
                &session.access_token,
                &details.id,
                &last_commit.sha,
                merge.strategy.as_github(),
            )
            .await
        {
            Ok(()) => {}
            Err(GithubError::GraphQL(errors)) => {
                self.surface(session, details, last_commit, "error during merge", &errors.to_string())
                    .await?;
                return Err(GithubError::GraphQL(errors).into());
            }
            Err(err) => return Err(err.into()),
        }
        Ok((false, true))
    }

    /// One user-visible decision, one check-run write.
    async fn surface(
        &self,
        session: &Session,
        details: &PullRequestDetails,
        last_commit: &LastCommit,
        title: &str,
        summary: &str,
    ) -> Result<(), ReconcileError> {
        self.check_runs
            .create_or_update(
                &self.github,
                &session.access_token,
                &session.repository,
                &details.id,
                &last_commit.sha,
                "COMPLETED",
                title,
                summary,
            )
            .await
    }
}
