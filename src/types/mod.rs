//! Shared domain types: repository handles, work-item messages, delivery ids.

mod ids;
mod message;

pub use ids::DeliveryId;
pub use message::{
    PullRequestMessage, PullRequestRef, PushMessage, Repository, StatusMessage, WorkMessage,
};
