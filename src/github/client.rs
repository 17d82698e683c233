//! The HTTP client for both API surfaces.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::details::{self, PullRequestDetails};
use super::error::{GithubError, GraphQLErrors};
use crate::policy::POLICY_PATH;
use crate::types::{PullRequestRef, Repository};

/// Responses are read up to this many bytes; the remainder is discarded.
const MAX_BODY_BYTES: usize = 1024 * 1024 * 16;

const API_VERSION: &str = "2022-11-28";

/// An installation access token with its expiry, as minted by the host and
/// as cached in the access-tokens bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Client for the remote host, authenticated per call.
///
/// The base URLs are fields so tests can point the client at a local mock.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    raw_base: String,
    app_id: u64,
    private_key: Vec<u8>,
}

impl GithubClient {
    pub fn new(app_id: u64, private_key: Vec<u8>) -> Result<Self, GithubError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("merge-pilot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(GithubClient {
            http,
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            app_id,
            private_key,
        })
    }

    /// Redirects all requests to the given bases. Test hook.
    pub fn with_base_urls(mut self, api_base: impl Into<String>, raw_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.raw_base = raw_base.into();
        self
    }

    // ─── REST ───

    /// Mints an installation access token scoped to one repository.
    pub async fn create_access_token(
        &self,
        installation_id: i64,
        repository: &Repository,
    ) -> Result<AccessToken, GithubError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );
        let body = json!({
            "repository": repository.full_name,
            "permissions": {
                "pull_requests": "write",
                "contents": "write",
                "workflows": "write",
            },
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.app_jwt()?)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let (status, buf) = read_capped(response).await?;
        if status != 201 {
            return Err(GithubError::UnexpectedStatus {
                context: "error when getting access token",
                expected: 201,
                actual: status,
                body: String::from_utf8_lossy(&buf).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Fetches the raw policy file at a specific commit. `None` on 404.
    pub async fn fetch_raw_policy(
        &self,
        token: &str,
        repository: &Repository,
        sha: &str,
    ) -> Result<Option<Vec<u8>>, GithubError> {
        let url = format!(
            "{}/{}/{}/{}",
            self.raw_base, repository.full_name, sha, POLICY_PATH
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.raw")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let (status, buf) = read_capped(response).await?;
        match status {
            404 => Ok(None),
            200 => Ok(Some(buf)),
            actual => Err(GithubError::UnexpectedStatus {
                context: "error when getting config",
                expected: 200,
                actual,
                body: String::from_utf8_lossy(&buf).into_owned(),
            }),
        }
    }

    /// The short-lived app JWT used only to mint installation tokens.
    fn app_jwt(&self) -> Result<String, GithubError> {
        #[derive(Serialize)]
        struct AppClaims {
            iss: String,
            iat: i64,
            exp: i64,
        }

        let iat = (Utc::now() - ChronoDuration::seconds(30))
            .duration_trunc(ChronoDuration::seconds(1))
            .unwrap_or_else(|_| Utc::now())
            .timestamp();
        let claims = AppClaims {
            iss: self.app_id.to_string(),
            iat,
            exp: iat + 2 * 60,
        };
        let key = EncodingKey::from_rsa_pem(&self.private_key)?;
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &key,
        )?)
    }

    // ─── GraphQL ───

    pub(super) async fn graphql(
        &self,
        token: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, GithubError> {
        let body = json!({ "query": query, "variables": variables });
        let response = self
            .http
            .post(format!("{}/graphql", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let (status, buf) = read_capped(response).await?;
        decode_graphql_body(status, &buf)
    }

    /// The tip commit of the default branch; empty string for empty repos.
    pub async fn latest_base_sha(
        &self,
        token: &str,
        repository: &Repository,
    ) -> Result<String, GithubError> {
        let data = self
            .graphql(
                token,
                r#"
query LatestBaseCommitSha($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef { target { oid } }
  }
}
"#,
                json!({ "owner": repository.owner_name, "name": repository.name }),
            )
            .await?;
        Ok(data
            .pointer("/repository/defaultBranchRef/target/oid")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// All open pull requests bearing at least one of the given labels.
    pub async fn open_pull_requests_with_labels(
        &self,
        token: &str,
        repository: &Repository,
        labels: &[String],
    ) -> Result<Vec<PullRequestRef>, GithubError> {
        #[derive(Deserialize)]
        struct Data {
            search: Search,
        }
        #[derive(Deserialize)]
        struct Search {
            #[serde(default)]
            nodes: Vec<Node>,
            #[serde(rename = "pageInfo")]
            page_info: PageInfo,
        }
        #[derive(Deserialize, Default)]
        struct Node {
            #[serde(default)]
            number: i64,
        }
        #[derive(Deserialize)]
        struct PageInfo {
            #[serde(rename = "endCursor", default)]
            end_cursor: Option<String>,
            #[serde(rename = "hasNextPage", default)]
            has_next_page: bool,
        }

        let query = r#"
query OpenPullRequests($query: String!, $after: String) {
  search(query: $query, type: ISSUE, first: 100, after: $after) {
    nodes { ... on PullRequest { number } }
    pageInfo { endCursor hasNextPage }
  }
}
"#;
        let search = format!(
            "repo:{} is:pr state:open label:{}",
            repository.full_name,
            labels.join(",")
        );

        let mut pull_requests = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let data = self
                .graphql(token, query, json!({ "query": search, "after": after }))
                .await?;
            let page: Data = serde_json::from_value(data)?;
            pull_requests.extend(
                page.search
                    .nodes
                    .into_iter()
                    .filter(|n| n.number != 0)
                    .map(|n| PullRequestRef { number: n.number }),
            );
            if !page.search.page_info.has_next_page {
                break;
            }
            after = page.search.page_info.end_cursor;
        }
        debug!(count = pull_requests.len(), "found open pull requests with labels");
        Ok(pull_requests)
    }

    /// The full pre-decision snapshot of one pull request.
    pub async fn pull_request_details(
        &self,
        token: &str,
        repository: &Repository,
        number: i64,
    ) -> Result<PullRequestDetails, GithubError> {
        details::fetch(self, token, repository, number).await
    }

    /// Rebases the pull request's branch onto its base.
    pub async fn update_pull_request_branch(
        &self,
        token: &str,
        pull_request_id: &str,
        expected_head_oid: &str,
    ) -> Result<(), GithubError> {
        self.graphql(
            token,
            r#"
mutation UpdatePullRequestBranch($pullRequestId: ID!, $expectedHeadOid: GitObjectID!) {
  updatePullRequestBranch(input: {
    pullRequestId: $pullRequestId,
    expectedHeadOid: $expectedHeadOid,
  }) {
    clientMutationId
  }
}
"#,
            json!({ "pullRequestId": pull_request_id, "expectedHeadOid": expected_head_oid }),
        )
        .await?;
        Ok(())
    }

    /// Merges the pull request with the configured strategy.
    pub async fn merge_pull_request(
        &self,
        token: &str,
        pull_request_id: &str,
        expected_head_oid: &str,
        merge_method: &str,
    ) -> Result<(), GithubError> {
        self.graphql(
            token,
            r#"
mutation MergePullRequest($pullRequestId: ID!, $expectedHeadOid: GitObjectID!, $mergeMethod: PullRequestMergeMethod!) {
  mergePullRequest(input: {
    pullRequestId: $pullRequestId,
    expectedHeadOid: $expectedHeadOid,
    mergeMethod: $mergeMethod,
  }) {
    clientMutationId
  }
}
"#,
            json!({
                "pullRequestId": pull_request_id,
                "expectedHeadOid": expected_head_oid,
                "mergeMethod": merge_method,
            }),
        )
        .await?;
        Ok(())
    }

    /// Deletes a ref (the merged head branch) by node id.
    pub async fn delete_ref(&self, token: &str, ref_node_id: &str) -> Result<(), GithubError> {
        self.graphql(
            token,
            r#"
mutation DeleteRef($refId: ID!) {
  deleteRef(input: { refId: $refId }) {
    clientMutationId
  }
}
"#,
            json!({ "refId": ref_node_id }),
        )
        .await?;
        Ok(())
    }

    /// Creates a check run on a commit, returning its node id.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_check_run(
        &self,
        token: &str,
        repository_node_id: &str,
        sha: &str,
        status: &str,
        name: &str,
        title: &str,
        summary: &str,
    ) -> Result<String, GithubError> {
        let data = self
            .graphql(
                token,
                r#"
mutation CreateCheckRun(
  $repositoryId: ID!,
  $sha: GitObjectID!,
  $status: RequestableCheckStatusState!,
  $name: String!,
  $title: String!,
  $summary: String!
) {
  createCheckRun(input: {
    repositoryId: $repositoryId,
    headSha: $sha,
    status: $status,
    name: $name,
    conclusion: NEUTRAL,
    output: { title: $title, summary: $summary }
  }) {
    checkRun { id }
  }
}
"#,
                json!({
                    "repositoryId": repository_node_id,
                    "sha": sha,
                    "status": status,
                    "name": name,
                    "title": title,
                    "summary": summary,
                }),
            )
            .await?;
        Ok(data
            .pointer("/createCheckRun/checkRun/id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Updates an existing check run, returning its node id.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_check_run(
        &self,
        token: &str,
        repository_node_id: &str,
        check_run_id: &str,
        status: &str,
        name: &str,
        title: &str,
        summary: &str,
    ) -> Result<String, GithubError> {
        let data = self
            .graphql(
                token,
                r#"
mutation UpdateCheckRun(
  $checkRunId: ID!,
  $repositoryId: ID!,
  $status: RequestableCheckStatusState!,
  $name: String!,
  $title: String!,
  $summary: String!
) {
  updateCheckRun(input: {
    checkRunId: $checkRunId,
    repositoryId: $repositoryId,
    status: $status,
    name: $name,
    conclusion: NEUTRAL,
    output: { title: $title, summary: $summary }
  }) {
    checkRun { id }
  }
}
"#,
                json!({
                    "checkRunId": check_run_id,
                    "repositoryId": repository_node_id,
                    "status": status,
                    "name": name,
                    "title": title,
                    "summary": summary,
                }),
            )
            .await?;
        Ok(data
            .pointer("/updateCheckRun/checkRun/id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base)
            .field("raw_base", &self.raw_base)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// Reads a response body, stopping at the size cap.
async fn read_capped(mut response: reqwest::Response) -> Result<(u16, Vec<u8>), GithubError> {
    let status = response.status().as_u16();
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let remaining = MAX_BODY_BYTES - buf.len();
        if chunk.len() >= remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((status, buf))
}

/// Validates a GraphQL response: 200 expected, host-reported errors become
/// [`GraphQLErrors`], otherwise the `data` payload is returned.
pub(super) fn decode_graphql_body(
    status: u16,
    buf: &[u8],
) -> Result<serde_json::Value, GithubError> {
    if status != 200 {
        return Err(GithubError::UnexpectedStatus {
            context: "request failed",
            expected: 200,
            actual: status,
            body: String::from_utf8_lossy(buf).into_owned(),
        });
    }

    #[derive(Deserialize)]
    struct Envelope {
        #[serde(default)]
        errors: Vec<ErrorMessage>,
        #[serde(default)]
        data: serde_json::Value,
    }
    #[derive(Deserialize)]
    struct ErrorMessage {
        #[serde(default)]
        message: String,
    }

    let envelope: Envelope = serde_json::from_slice(buf)?;
    if !envelope.errors.is_empty() {
        return Err(GithubError::GraphQL(GraphQLErrors {
            messages: envelope.errors.into_iter().map(|e| e.message).collect(),
        }));
    }
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn repository() -> Repository {
        Repository {
            full_name: "acme/svc".to_string(),
            name: "svc".to_string(),
            node_id: "R_abc".to_string(),
            owner_name: "acme".to_string(),
            private: false,
        }
    }

    fn client_for(server: &MockServer) -> GithubClient {
        GithubClient::new(1, Vec::new())
            .unwrap()
            .with_base_urls(server.base_url(), server.base_url())
    }

    // ─── decode_graphql_body ───

    #[test]
    fn non_200_is_unexpected_status() {
        match decode_graphql_body(502, b"bad gateway") {
            Err(GithubError::UnexpectedStatus { actual: 502, .. }) => {}
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
    }

    #[test]
    fn errors_payload_becomes_graphql_errors() {
        let body = br#"{"data": null, "errors": [{"message": "first"}, {"message": "second"}]}"#;
        match decode_graphql_body(200, body) {
            Err(GithubError::GraphQL(errors)) => {
                assert_eq!(errors.messages, vec!["first", "second"]);
            }
            other => panic!("expected GraphQL errors, got {other:?}"),
        }
    }

    #[test]
    fn data_payload_is_returned() {
        let body = br#"{"data": {"x": 1}}"#;
        let data = decode_graphql_body(200, body).unwrap();
        assert_eq!(data["x"], 1);
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(matches!(
            decode_graphql_body(200, b"not json"),
            Err(GithubError::Decode(_))
        ));
    }

    // ─── raw policy fetch ───

    #[tokio::test]
    async fn raw_policy_404_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/svc/abc123/.github/merge-with-label.yml");
            then.status(404);
        });

        let client = client_for(&server);
        let result = client
            .fetch_raw_policy("token", &repository(), "abc123")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn raw_policy_200_returns_bytes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/svc/abc123/.github/merge-with-label.yml")
                .header("authorization", "Bearer token");
            then.status(200).body("version: 1\n");
        });

        let client = client_for(&server);
        let result = client
            .fetch_raw_policy("token", &repository(), "abc123")
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some(b"version: 1\n".as_slice()));
    }

    #[tokio::test]
    async fn raw_policy_500_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/svc/abc123/.github/merge-with-label.yml");
            then.status(500).body("boom");
        });

        let client = client_for(&server);
        let result = client.fetch_raw_policy("token", &repository(), "abc123").await;
        assert!(matches!(
            result,
            Err(GithubError::UnexpectedStatus { actual: 500, .. })
        ));
    }

    // ─── GraphQL round-trips ───

    #[tokio::test]
    async fn latest_base_sha_reads_default_branch_tip() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).json_body(serde_json::json!({
                "data": {
                    "repository": {
                        "defaultBranchRef": { "target": { "oid": "abc123" } }
                    }
                }
            }));
        });

        let client = client_for(&server);
        let sha = client.latest_base_sha("token", &repository()).await.unwrap();
        assert_eq!(sha, "abc123");
    }

    #[tokio::test]
    async fn latest_base_sha_is_empty_for_empty_repo() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200)
                .json_body(serde_json::json!({ "data": { "repository": { "defaultBranchRef": null } } }));
        });

        let client = client_for(&server);
        let sha = client.latest_base_sha("token", &repository()).await.unwrap();
        assert_eq!(sha, "");
    }

    #[tokio::test]
    async fn merge_surfaces_graphql_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).json_body(serde_json::json!({
                "data": null,
                "errors": [{ "message": "Pull request is not mergeable" }]
            }));
        });

        let client = client_for(&server);
        let result = client
            .merge_pull_request("token", "PR_1", "abc123", "SQUASH")
            .await;
        match result {
            Err(GithubError::GraphQL(errors)) => {
                assert_eq!(errors.messages, vec!["Pull request is not mergeable"]);
            }
            other => panic!("expected GraphQL errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_pull_requests_filters_non_pr_nodes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).json_body(serde_json::json!({
                "data": {
                    "search": {
                        "nodes": [{ "number": 7 }, {}, { "number": 42 }],
                        "pageInfo": { "endCursor": null, "hasNextPage": false }
                    }
                }
            }));
        });

        let client = client_for(&server);
        let prs = client
            .open_pull_requests_with_labels("token", &repository(), &["merge".to_string()])
            .await
            .unwrap();
        assert_eq!(
            prs,
            vec![PullRequestRef { number: 7 }, PullRequestRef { number: 42 }]
        );
    }

    #[tokio::test]
    async fn create_check_run_returns_node_id() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).json_body(serde_json::json!({
                "data": { "createCheckRun": { "checkRun": { "id": "CR_1" } } }
            }));
        });

        let client = client_for(&server);
        let id = client
            .create_check_run("token", "R_abc", "abc123", "COMPLETED", "bot", "t", "s")
            .await
            .unwrap();
        assert_eq!(id, "CR_1");
    }
}
