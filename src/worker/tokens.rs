//! The access-token cache.
//!
//! Tokens are cached in a KV bucket under the hashed repository name and
//! reused until they expire. Races between workers minting at once are
//! tolerated: both mints succeed remotely and last writer wins.

use async_nats::jetstream::kv;
use bytes::Bytes;
use chrono::Utc;
use tracing::debug;

use super::error::ReconcileError;
use crate::github::{AccessToken, GithubClient};
use crate::queue::kv_key;
use crate::types::Repository;

pub struct AccessTokens {
    kv: kv::Store,
}

impl AccessTokens {
    pub fn new(kv: kv::Store) -> Self {
        AccessTokens { kv }
    }

    /// Returns a token that is valid now, minting a fresh one on a miss,
    /// an unreadable entry, or an expired entry.
    pub async fn get(
        &self,
        github: &GithubClient,
        repository: &Repository,
        installation_id: i64,
    ) -> Result<String, ReconcileError> {
        let key = kv_key(&repository.full_name);

        if let Some(value) = self.kv.get(key.as_str()).await? {
            if !value.is_empty() {
                match serde_json::from_slice::<AccessToken>(&value) {
                    Ok(cached) if cached.expires_at > Utc::now() => {
                        debug!(hash_key = %key, "got access token from cache");
                        return Ok(cached.token);
                    }
                    Ok(_) => {
                        debug!(hash_key = %key, reason = "expired", "creating a new access token");
                    }
                    Err(err) => {
                        debug!(hash_key = %key, error = %err, "unable to decode cached access token");
                    }
                }
            }
        } else {
            debug!(hash_key = %key, reason = "not in cache", "creating a new access token");
        }

        let token = github.create_access_token(installation_id, repository).await?;
        let buf = serde_json::to_vec(&token)?;
        debug!(hash_key = %key, "storing access token in cache");
        self.kv.put(key.as_str(), Bytes::from(buf)).await?;
        Ok(token.token)
    }
}
