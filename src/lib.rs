//! merge-pilot - a GitHub bot that updates and merges pull requests based on labels.
//!
//! Two processes share one JetStream substrate: the ingress turns webhook
//! deliveries into durable work items, and the worker reconciles the affected
//! pull requests against the repository's policy file.

pub mod github;
pub mod ingress;
pub mod matcher;
pub mod policy;
pub mod queue;
pub mod settings;
pub mod types;
pub mod worker;
