//! GitHub API error types.

use std::fmt;
use thiserror::Error;

/// Logical errors reported by the GraphQL endpoint alongside a 200.
///
/// These carry the host's own wording. When a mutation fails this way during
/// update or merge, the messages are surfaced to the user through the
/// check-run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQLErrors {
    pub messages: Vec<String>,
}

impl fmt::Display for GraphQLErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.messages.join("\n"))
    }
}

impl std::error::Error for GraphQLErrors {}

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("unable to execute request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{context}: expected status {expected}, got {actual}: {body}")]
    UnexpectedStatus {
        context: &'static str,
        expected: u16,
        actual: u16,
        body: String,
    },

    #[error("unable to decode body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unable to parse date: {0}")]
    Date(#[from] chrono::ParseError),

    #[error(transparent)]
    GraphQL(GraphQLErrors),

    #[error("could not sign jwt: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl GithubError {
    /// The host-reported GraphQL messages, if this is a logical failure.
    pub fn graphql_messages(&self) -> Option<&GraphQLErrors> {
        match self {
            GithubError::GraphQL(errors) => Some(errors),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_errors_display_joined() {
        let errors = GraphQLErrors {
            messages: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(errors.to_string(), "first\nsecond");
    }

    #[test]
    fn graphql_messages_accessor() {
        let err = GithubError::GraphQL(GraphQLErrors {
            messages: vec!["nope".to_string()],
        });
        assert!(err.graphql_messages().is_some());

        let err = GithubError::UnexpectedStatus {
            context: "x",
            expected: 200,
            actual: 500,
            body: String::new(),
        };
        assert!(err.graphql_messages().is_none());
    }
}
