//! Per-repository policy: which labels trigger what, and when to hold back.
//!
//! The policy lives in the repository at `.github/merge-with-label.yml`,
//! versioned so the schema can evolve. Only version 1 is understood;
//! anything else is an error rather than a guess.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::PatternList;

/// Location of the policy file inside the repository.
pub const POLICY_PATH: &str = ".github/merge-with-label.yml";

/// Errors from reading a policy file.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unable to decode policy header: {0}")]
    Header(#[source] serde_yaml::Error),

    #[error("unable to decode policy: {0}")]
    Body(#[source] serde_yaml::Error),

    #[error("unknown policy version `{0}'")]
    UnknownVersion(i64),
}

/// How a pull request is merged once it qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Commit,
    #[default]
    Squash,
    Rebase,
}

impl MergeStrategy {
    /// The GraphQL `PullRequestMergeMethod` value.
    pub fn as_github(&self) -> &'static str {
        match self {
            MergeStrategy::Commit => "MERGE",
            MergeStrategy::Squash => "SQUASH",
            MergeStrategy::Rebase => "REBASE",
        }
    }
}

/// Rules that exclude a pull request from an action entirely.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IgnoreRules {
    #[serde(default, rename = "ignoreFromUsers")]
    pub ignore_from_users: PatternList,

    #[serde(default, rename = "ignoreWithTitles")]
    pub ignore_with_titles: PatternList,

    #[serde(default, rename = "ignoreWithLabels")]
    pub ignore_with_labels: PatternList,
}

impl IgnoreRules {
    pub fn ignored_user(&self, login: &str) -> Option<&str> {
        self.ignore_from_users.matches_one(login)
    }

    pub fn ignored_title(&self, title: &str) -> Option<&str> {
        self.ignore_with_titles.matches_one(title)
    }

    pub fn ignored_label(&self, label: &str) -> Option<&str> {
        self.ignore_with_labels.matches_one(label)
    }
}

/// The `merge:` section of the policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergePolicy {
    #[serde(default)]
    pub labels: PatternList,

    #[serde(default)]
    pub strategy: MergeStrategy,

    #[serde(default, rename = "requiredApprovals")]
    pub required_approvals: usize,

    #[serde(default, rename = "requireApprovalsFrom")]
    pub require_approvals_from: PatternList,

    #[serde(default, rename = "requiredChecks")]
    pub required_checks: PatternList,

    #[serde(default, rename = "requireLinearHistory")]
    pub require_linear_history: bool,

    #[serde(default, rename = "deleteBranch")]
    pub delete_branch: bool,

    #[serde(flatten)]
    pub ignore: IgnoreRules,
}

/// The `update:` section of the policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdatePolicy {
    #[serde(default)]
    pub labels: PatternList,

    #[serde(flatten)]
    pub ignore: IgnoreRules,
}

/// A parsed repository policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPolicy {
    pub version: i64,

    #[serde(default)]
    pub merge: MergePolicy,

    #[serde(default)]
    pub update: UpdatePolicy,
}

#[derive(Debug, Deserialize)]
struct PolicyHeader {
    #[serde(default)]
    version: i64,
}

impl RepoPolicy {
    /// Parses a policy file, dispatching on the version header.
    pub fn parse(buf: &[u8]) -> Result<RepoPolicy, PolicyError> {
        let header: PolicyHeader = serde_yaml::from_slice(buf).map_err(PolicyError::Header)?;
        match header.version {
            1 => serde_yaml::from_slice(buf).map_err(PolicyError::Body),
            other => Err(PolicyError::UnknownVersion(other)),
        }
    }

    /// The built-in policy used when a repository has no policy file.
    pub fn default_policy() -> RepoPolicy {
        static DEFAULT: &str = r#"
version: 1
merge:
  labels: ["merge"]
  strategy: "squash"
  requiredChecks:
    - .*
  requireLinearHistory: false
  deleteBranch: true
update:
  labels: ["update-branch"]
  ignoreFromUsers:
    - "dependabot"
"#;
        // The default above is a valid v1 policy; parsing it cannot fail.
        RepoPolicy::parse(DEFAULT.as_bytes()).unwrap_or(RepoPolicy {
            version: 1,
            merge: MergePolicy::default(),
            update: UpdatePolicy::default(),
        })
    }

    /// True when neither merging nor updating is enabled.
    pub fn is_disabled(&self) -> bool {
        self.merge.labels.is_empty() && self.update.labels.is_empty()
    }
}

/// The value stored in the configs KV bucket: the policy plus the base-branch
/// sha it was fetched at. A changed sha invalidates the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPolicy {
    pub sha: String,
    #[serde(flatten)]
    pub policy: RepoPolicy,
}
