//! Per-message session assembly.

use tracing::debug;

use super::error::ReconcileError;
use super::run::Worker;
use crate::policy::RepoPolicy;
use crate::types::Repository;

/// Everything a reconciler needs for one message: the repository, a valid
/// access token, and the policy effective at the current base sha.
pub struct Session {
    pub repository: Repository,
    pub installation_id: i64,
    pub access_token: String,
    pub policy: RepoPolicy,
}

impl Worker {
    /// Assembles the session, or `None` when there is nothing to do for
    /// this repository (empty repo, or merge and update both disabled).
    pub(crate) async fn session(
        &self,
        installation_id: i64,
        repository: &Repository,
    ) -> Result<Option<Session>, ReconcileError> {
        let access_token = self
            .tokens
            .get(&self.github, repository, installation_id)
            .await?;

        let sha = self.github.latest_base_sha(&access_token, repository).await?;
        if sha.is_empty() {
            debug!("latest commit sha is empty");
            return Ok(None);
        }

        let Some(policy) = self
            .policies
            .get(&self.github, &access_token, repository, &sha)
            .await?
        else {
            debug!("no config");
            return Ok(None);
        };

        if policy.is_disabled() {
            debug!("merge and update are disabled");
            return Ok(None);
        }

        Ok(Some(Session {
            repository: repository.clone(),
            installation_id,
            access_token,
            policy,
        }))
    }
}
