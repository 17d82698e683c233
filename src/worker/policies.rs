//! The policy cache.
//!
//! Cached entries carry the base-branch sha they were fetched at; when the
//! base advances, the entry is refetched. A repository without a policy
//! file gets the built-in default, which is deliberately never cached so a
//! newly committed file takes effect on the next message.

use async_nats::jetstream::kv;
use bytes::Bytes;
use tracing::debug;

use super::error::ReconcileError;
use crate::github::GithubClient;
use crate::policy::{CachedPolicy, RepoPolicy};
use crate::queue::kv_key;
use crate::types::Repository;

pub struct Policies {
    kv: kv::Store,
}

impl Policies {
    pub fn new(kv: kv::Store) -> Self {
        Policies { kv }
    }

    /// The policy effective at `sha`. `None` when the sha is empty (empty
    /// repository).
    pub async fn get(
        &self,
        github: &GithubClient,
        token: &str,
        repository: &Repository,
        sha: &str,
    ) -> Result<Option<RepoPolicy>, ReconcileError> {
        if sha.is_empty() {
            return Ok(None);
        }
        let key = kv_key(&repository.full_name);

        if let Some(value) = self.kv.get(key.as_str()).await? {
            if !value.is_empty() {
                match serde_json::from_slice::<CachedPolicy>(&value) {
                    Ok(cached) if cached.sha == sha => {
                        debug!(hash_key = %key, sha = %sha, "got config from cache");
                        return Ok(Some(cached.policy));
                    }
                    Ok(_) => {
                        debug!(hash_key = %key, sha = %sha, reason = "possible old config", "getting latest config");
                    }
                    Err(err) => {
                        debug!(hash_key = %key, error = %err, "unable to decode cached config");
                    }
                }
            }
        } else {
            debug!(hash_key = %key, sha = %sha, reason = "not in cache", "getting latest config");
        }

        let Some(buf) = github.fetch_raw_policy(token, repository, sha).await? else {
            debug!("no config found, returning default config");
            return Ok(Some(RepoPolicy::default_policy()));
        };

        let policy = RepoPolicy::parse(&buf)?;
        let cached = CachedPolicy {
            sha: sha.to_string(),
            policy: policy.clone(),
        };
        debug!(hash_key = %key, "storing config in cache");
        self.kv
            .put(key.as_str(), Bytes::from(serde_json::to_vec(&cached)?))
            .await?;
        Ok(Some(policy))
    }
}
