//! The pre-decision pull-request snapshot.
//!
//! Every decision the worker makes is based on a fresh snapshot fetched
//! here, never on webhook payloads. Two queries: the base-ref name first
//! (it feeds the compare argument), then the full detail set.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

use super::client::GithubClient;
use super::error::GithubError;
use crate::types::Repository;

/// The tip commit of the pull request's branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastCommit {
    pub sha: String,
    pub committed_at: DateTime<Utc>,
}

/// Snapshot of one pull request, rebuilt before every decision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullRequestDetails {
    /// The pull request's GraphQL node id.
    pub id: String,
    pub title: String,
    pub state: String,
    pub author: String,
    pub labels: Vec<String>,
    /// Commits the base is ahead of the head by; > 0 means "behind base".
    pub ahead_by: i64,
    pub has_conflicts: bool,
    pub is_mergeable: bool,
    pub approved_by: Vec<String>,
    pub base_ref_name: String,
    pub head_ref_id: String,
    pub head_ref_name: String,
    pub last_commit: Option<LastCommit>,
    /// Check name to state; union of status contexts, check-suite
    /// conclusions, and `<app>/<run>` check-run conclusions.
    pub check_states: BTreeMap<String, String>,
}

pub(super) async fn fetch(
    client: &GithubClient,
    token: &str,
    repository: &Repository,
    number: i64,
) -> Result<PullRequestDetails, GithubError> {
    let base_ref_name = fetch_base_ref_name(client, token, repository, number).await?;

    let data = client
        .graphql(
            token,
            DETAILS_QUERY,
            json!({
                "owner": repository.owner_name,
                "name": repository.name,
                "number": number,
                "branch": base_ref_name,
            }),
        )
        .await?;
    build_details(&data, base_ref_name)
}

async fn fetch_base_ref_name(
    client: &GithubClient,
    token: &str,
    repository: &Repository,
    number: i64,
) -> Result<String, GithubError> {
    let data = client
        .graphql(
            token,
            r#"
query PullRequestBaseName($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      baseRef { name }
    }
  }
}
"#,
            json!({ "owner": repository.owner_name, "name": repository.name, "number": number }),
        )
        .await?;
    Ok(data
        .pointer("/repository/pullRequest/baseRef/name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string())
}

const DETAILS_QUERY: &str = r#"
query PullRequestDetails($owner: String!, $name: String!, $number: Int!, $branch: String!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      id
      title
      state
      mergeable
      author { login }
      labels(last: 100) { nodes { name } }
      reviews(states: APPROVED, last: 100) { nodes { author { login } } }
      headRef {
        id
        name
        compare(headRef: $branch) { aheadBy }
      }
      commits(last: 1) {
        nodes {
          commit {
            oid
            committedDate
            status { contexts { context state } }
            checkSuites(last: 100) {
              nodes {
                app { name }
                conclusion
                checkRuns(last: 100) { nodes { name status conclusion } }
              }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Deserialize, Default)]
struct Data {
    #[serde(default)]
    repository: RepositoryNode,
}

#[derive(Deserialize, Default)]
struct RepositoryNode {
    #[serde(rename = "pullRequest", default)]
    pull_request: PullRequestNode,
}

#[derive(Deserialize, Default)]
struct PullRequestNode {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    mergeable: String,
    #[serde(default)]
    author: Option<Login>,
    #[serde(default)]
    labels: Nodes<NamedNode>,
    #[serde(default)]
    reviews: Nodes<ReviewNode>,
    #[serde(rename = "headRef", default)]
    head_ref: Option<HeadRef>,
    #[serde(default)]
    commits: Nodes<CommitNode>,
}

#[derive(Deserialize, Default)]
struct Login {
    #[serde(default)]
    login: String,
}

#[derive(Deserialize, Default)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Deserialize, Default)]
struct NamedNode {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Default)]
struct ReviewNode {
    #[serde(default)]
    author: Option<Login>,
}

#[derive(Deserialize, Default)]
struct HeadRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    compare: Option<Compare>,
}

#[derive(Deserialize, Default)]
struct Compare {
    #[serde(rename = "aheadBy", default)]
    ahead_by: i64,
}

#[derive(Deserialize, Default)]
struct CommitNode {
    #[serde(default)]
    commit: Commit,
}

#[derive(Deserialize, Default)]
struct Commit {
    #[serde(default)]
    oid: String,
    #[serde(rename = "committedDate", default)]
    committed_date: String,
    #[serde(default)]
    status: Option<Status>,
    #[serde(rename = "checkSuites", default)]
    check_suites: Nodes<CheckSuite>,
}

#[derive(Deserialize, Default)]
struct Status {
    #[serde(default)]
    contexts: Vec<StatusContext>,
}

#[derive(Deserialize, Default)]
struct StatusContext {
    #[serde(default)]
    context: String,
    #[serde(default)]
    state: String,
}

#[derive(Deserialize, Default)]
struct CheckSuite {
    #[serde(default)]
    app: Option<NamedNode>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(rename = "checkRuns", default)]
    check_runs: Nodes<CheckRun>,
}

#[derive(Deserialize, Default)]
struct CheckRun {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

/// Builds the snapshot from the raw `data` payload.
pub(super) fn build_details(
    data: &serde_json::Value,
    base_ref_name: String,
) -> Result<PullRequestDetails, GithubError> {
    let parsed: Data = serde_json::from_value(data.clone())?;
    let pr = parsed.repository.pull_request;

    let mut details = PullRequestDetails {
        id: pr.id,
        title: pr.title,
        state: pr.state,
        author: pr.author.map(|a| a.login).unwrap_or_default(),
        labels: pr.labels.nodes.into_iter().map(|l| l.name).collect(),
        ahead_by: pr
            .head_ref
            .as_ref()
            .and_then(|h| h.compare.as_ref())
            .map(|c| c.ahead_by)
            .unwrap_or_default(),
        has_conflicts: pr.mergeable == "CONFLICTING",
        is_mergeable: pr.mergeable == "MERGEABLE",
        approved_by: pr
            .reviews
            .nodes
            .into_iter()
            .map(|r| r.author.map(|a| a.login).unwrap_or_default())
            .collect(),
        base_ref_name,
        head_ref_id: pr.head_ref.as_ref().map(|h| h.id.clone()).unwrap_or_default(),
        head_ref_name: pr.head_ref.map(|h| h.name).unwrap_or_default(),
        last_commit: None,
        check_states: BTreeMap::new(),
    };

    if let Some(node) = pr.commits.nodes.into_iter().next() {
        let commit = node.commit;
        let committed_at = DateTime::parse_from_rfc3339(&commit.committed_date)?;
        details.last_commit = Some(LastCommit {
            sha: commit.oid,
            committed_at: committed_at.with_timezone(&Utc),
        });

        if let Some(status) = commit.status {
            for context in status.contexts {
                details.check_states.insert(context.context, context.state);
            }
        }
        for suite in commit.check_suites.nodes {
            let app_name = suite.app.map(|a| a.name).unwrap_or_default();
            details
                .check_states
                .insert(app_name.clone(), suite.conclusion.unwrap_or_default());
            for run in suite.check_runs.nodes {
                let state = if run.status == "COMPLETED" {
                    run.conclusion.unwrap_or_default()
                } else {
                    "PENDING".to_string()
                };
                details
                    .check_states
                    .insert(format!("{}/{}", app_name, run.name), state);
            }
        }
    }

    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> serde_json::Value {
        json!({
            "repository": {
                "pullRequest": {
                    "id": "PR_1",
                    "title": "Add feature",
                    "state": "OPEN",
                    "mergeable": "MERGEABLE",
                    "author": { "login": "alice" },
                    "labels": { "nodes": [{ "name": "merge" }, { "name": "needs-qa" }] },
                    "reviews": { "nodes": [{ "author": { "login": "bob" } }] },
                    "headRef": {
                        "id": "REF_1",
                        "name": "feature",
                        "compare": { "aheadBy": 3 }
                    },
                    "commits": {
                        "nodes": [{
                            "commit": {
                                "oid": "abc123",
                                "committedDate": "2024-05-01T12:00:00Z",
                                "status": {
                                    "contexts": [{ "context": "ci/legacy", "state": "SUCCESS" }]
                                },
                                "checkSuites": {
                                    "nodes": [{
                                        "app": { "name": "actions" },
                                        "conclusion": "SUCCESS",
                                        "checkRuns": {
                                            "nodes": [
                                                { "name": "lint", "status": "COMPLETED", "conclusion": "SUCCESS" },
                                                { "name": "test", "status": "IN_PROGRESS", "conclusion": null }
                                            ]
                                        }
                                    }]
                                }
                            }
                        }]
                    }
                }
            }
        })
    }

    #[test]
    fn builds_full_snapshot() {
        let details = build_details(&sample_data(), "main".to_string()).unwrap();

        assert_eq!(details.id, "PR_1");
        assert_eq!(details.title, "Add feature");
        assert_eq!(details.state, "OPEN");
        assert_eq!(details.author, "alice");
        assert_eq!(details.labels, vec!["merge", "needs-qa"]);
        assert_eq!(details.ahead_by, 3);
        assert!(details.is_mergeable);
        assert!(!details.has_conflicts);
        assert_eq!(details.approved_by, vec!["bob"]);
        assert_eq!(details.base_ref_name, "main");
        assert_eq!(details.head_ref_id, "REF_1");
        assert_eq!(details.head_ref_name, "feature");

        let commit = details.last_commit.unwrap();
        assert_eq!(commit.sha, "abc123");
        assert_eq!(commit.committed_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn check_states_union_rules() {
        let details = build_details(&sample_data(), "main".to_string()).unwrap();

        // Legacy status contexts by context name.
        assert_eq!(details.check_states["ci/legacy"], "SUCCESS");
        // Suite conclusion under the app name.
        assert_eq!(details.check_states["actions"], "SUCCESS");
        // Completed run: its conclusion under app/run.
        assert_eq!(details.check_states["actions/lint"], "SUCCESS");
        // Non-completed run: recorded as PENDING.
        assert_eq!(details.check_states["actions/test"], "PENDING");
    }

    #[test]
    fn conflicting_pr_is_flagged() {
        let mut data = sample_data();
        data["repository"]["pullRequest"]["mergeable"] = json!("CONFLICTING");
        let details = build_details(&data, "main".to_string()).unwrap();
        assert!(details.has_conflicts);
        assert!(!details.is_mergeable);
    }

    #[test]
    fn missing_commits_yield_no_last_commit() {
        let mut data = sample_data();
        data["repository"]["pullRequest"]["commits"] = json!({ "nodes": [] });
        let details = build_details(&data, "main".to_string()).unwrap();
        assert!(details.last_commit.is_none());
        assert!(details.check_states.is_empty());
    }

    #[test]
    fn ghost_author_is_empty() {
        let mut data = sample_data();
        data["repository"]["pullRequest"]["author"] = json!(null);
        let details = build_details(&data, "main".to_string()).unwrap();
        assert_eq!(details.author, "");
    }

    #[test]
    fn pending_suite_conclusion_is_empty_string() {
        let mut data = sample_data();
        data["repository"]["pullRequest"]["commits"]["nodes"][0]["commit"]["checkSuites"]["nodes"]
            [0]["conclusion"] = json!(null);
        let details = build_details(&data, "main".to_string()).unwrap();
        assert_eq!(details.check_states["actions"], "");
    }

    #[test]
    fn bad_commit_date_is_an_error() {
        let mut data = sample_data();
        data["repository"]["pullRequest"]["commits"]["nodes"][0]["commit"]["committedDate"] =
            json!("yesterday");
        assert!(build_details(&data, "main".to_string()).is_err());
    }
}
