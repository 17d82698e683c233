//! Queued work-item payloads.
//!
//! Every message carries the installation id and the repository handle the
//! event belongs to; `pull_request` items additionally name the PR number.
//! The payloads are what the ingress publishes and the worker decodes, so
//! their JSON shape is the wire contract between the two processes.

use serde::{Deserialize, Serialize};

/// A repository handle as carried inside work items.
///
/// Identity is the GraphQL `node_id`; the remaining fields exist so the
/// worker can build API calls without re-resolving the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub name: String,
    pub node_id: String,
    pub owner_name: String,
    pub private: bool,
}

/// The pull-request handle carried in `pull_request` work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: i64,
}

/// Common surface of every queued payload.
pub trait WorkMessage {
    fn installation_id(&self) -> i64;
    fn repository(&self) -> &Repository;
}

/// Work item for a base-branch advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub installation_id: i64,
    pub repository: Repository,
}

/// Work item for an external status update on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub installation_id: i64,
    pub repository: Repository,
}

/// Work item driving the per-PR state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestMessage {
    pub installation_id: i64,
    pub repository: Repository,
    pub pull_request: PullRequestRef,
}

impl WorkMessage for PushMessage {
    fn installation_id(&self) -> i64 {
        self.installation_id
    }
    fn repository(&self) -> &Repository {
        &self.repository
    }
}

impl WorkMessage for StatusMessage {
    fn installation_id(&self) -> i64 {
        self.installation_id
    }
    fn repository(&self) -> &Repository {
        &self.repository
    }
}

impl WorkMessage for PullRequestMessage {
    fn installation_id(&self) -> i64 {
        self.installation_id
    }
    fn repository(&self) -> &Repository {
        &self.repository
    }
}
