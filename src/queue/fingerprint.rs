//! Deduplication fingerprints and KV key hashing.
//!
//! A fingerprint identifies a unit of work (kind, installation, repository,
//! optional PR number). Its digest doubles as the message-id header and the
//! rate-limit bucket key, so bursts for the same resource collapse.

use sha2::{Digest, Sha256};

/// A stable string identifying a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint for a base-branch push: `push.<installation>.<repo-node>`.
    pub fn push(installation_id: i64, repo_node_id: &str) -> Self {
        Fingerprint(format!("push.{installation_id}.{repo_node_id}"))
    }

    /// Fingerprint for a commit status event.
    pub fn status(installation_id: i64, repo_node_id: &str) -> Self {
        Fingerprint(format!("status.{installation_id}.{repo_node_id}"))
    }

    /// Fingerprint for a single pull request.
    pub fn pull_request(installation_id: i64, repo_node_id: &str, number: i64) -> Self {
        Fingerprint(format!(
            "pull_request.{installation_id}.{repo_node_id}.{number}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fixed-width hex digest used as message-id and rate-limit key.
    pub fn key(&self) -> String {
        hash_hex(&self.0)
    }
}

/// Hashes an arbitrary name into a fixed-width KV key.
pub fn kv_key(name: &str) -> String {
    hash_hex(name)
}

fn hash_hex(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_stable_strings() {
        assert_eq!(
            Fingerprint::push(7, "R_abc").as_str(),
            "push.7.R_abc"
        );
        assert_eq!(
            Fingerprint::status(7, "R_abc").as_str(),
            "status.7.R_abc"
        );
        assert_eq!(
            Fingerprint::pull_request(7, "R_abc", 42).as_str(),
            "pull_request.7.R_abc.42"
        );
    }

    #[test]
    fn key_is_fixed_width_hex() {
        let key = Fingerprint::push(7, "R_abc").key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_is_deterministic_and_distinct() {
        let a = Fingerprint::pull_request(7, "R_abc", 1);
        let b = Fingerprint::pull_request(7, "R_abc", 2);
        assert_eq!(a.key(), Fingerprint::pull_request(7, "R_abc", 1).key());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn kv_key_matches_fingerprint_hash() {
        assert_eq!(kv_key("push.7.R_abc"), Fingerprint::push(7, "R_abc").key());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Keys are always 64 hex characters, whatever the inputs.
            #[test]
            fn key_width_is_constant(installation in 0i64..i64::MAX, node in "[A-Za-z0-9_=-]{1,40}", number in 0i64..i64::MAX) {
                let key = Fingerprint::pull_request(installation, &node, number).key();
                prop_assert_eq!(key.len(), 64);
                prop_assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
            }

            /// Distinct PR numbers never collide on the same repository.
            #[test]
            fn distinct_numbers_distinct_keys(a in 0i64..10_000, b in 0i64..10_000) {
                prop_assume!(a != b);
                prop_assert_ne!(
                    Fingerprint::pull_request(7, "R_abc", a).key(),
                    Fingerprint::pull_request(7, "R_abc", b).key()
                );
            }

            /// push and status fingerprints occupy disjoint key spaces.
            #[test]
            fn kinds_are_disjoint(installation in 0i64..i64::MAX, node in "[A-Za-z0-9_=-]{1,40}") {
                prop_assert_ne!(
                    Fingerprint::push(installation, &node).key(),
                    Fingerprint::status(installation, &node).key()
                );
            }
        }
    }
}
