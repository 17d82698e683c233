//! GitHub API client.
//!
//! Two surfaces: REST for installation-token issuance and raw policy-file
//! fetches, GraphQL for everything touching pull requests. One helper owns
//! request construction, authorization, the response size cap, and the
//! extraction of host-reported GraphQL errors.

mod client;
mod details;
mod error;

pub use client::{AccessToken, GithubClient};
pub use details::{LastCommit, PullRequestDetails};
pub use error::{GithubError, GraphQLErrors};
