//! The check-run surface.
//!
//! Every user-visible decision ends in exactly one create-or-update call
//! here. The bucket remembers the check-run id per (PR node id, head sha)
//! with a short TTL; when the head advances, the old entry ages out and a
//! fresh check run is created against the new sha.

use async_nats::jetstream::kv;
use bytes::Bytes;
use tracing::debug;

use super::error::ReconcileError;
use crate::github::GithubClient;
use crate::queue::kv_key;
use crate::types::Repository;

pub struct CheckRuns {
    kv: kv::Store,
    bot_name: String,
}

impl CheckRuns {
    pub fn new(kv: kv::Store, bot_name: impl Into<String>) -> Self {
        CheckRuns {
            kv,
            bot_name: bot_name.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_or_update(
        &self,
        github: &GithubClient,
        token: &str,
        repository: &Repository,
        pull_request_node_id: &str,
        sha: &str,
        status: &str,
        title: &str,
        summary: &str,
    ) -> Result<(), ReconcileError> {
        if sha.is_empty() {
            return Ok(());
        }

        let key = kv_key(&format!("{pull_request_node_id}{sha}"));
        let existing = self
            .kv
            .get(key.as_str())
            .await?
            .filter(|value| !value.is_empty());

        let check_run_id = match existing {
            None => {
                debug!(sha = %sha, "creating a new check run");
                github
                    .create_check_run(
                        token,
                        &repository.node_id,
                        sha,
                        status,
                        &self.bot_name,
                        title,
                        summary,
                    )
                    .await?
            }
            Some(value) => {
                let id = String::from_utf8_lossy(&value).into_owned();
                debug!(sha = %sha, check_run_id = %id, "updating check run");
                github
                    .update_check_run(
                        token,
                        &repository.node_id,
                        &id,
                        status,
                        &self.bot_name,
                        title,
                        summary,
                    )
                    .await?
            }
        };

        self.kv
            .put(key.as_str(), Bytes::from(check_run_id.into_bytes()))
            .await?;
        Ok(())
    }
}
