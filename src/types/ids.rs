//! Newtype wrapper for webhook delivery identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A webhook delivery id.
///
/// GitHub sends one in the `X-GitHub-Delivery` header; when it is absent a
/// fresh UUID is synthesized so every work item still has a unique subject
/// suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn new(s: impl Into<String>) -> Self {
        DeliveryId(s.into())
    }

    /// Generates a fresh delivery id for events that did not carry one.
    pub fn synthesize() -> Self {
        DeliveryId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeliveryId {
    fn from(s: String) -> Self {
        DeliveryId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let id = DeliveryId::new("550e8400-e29b-41d4-a716-446655440000");
        let json = serde_json::to_string(&id).unwrap();
        let parsed: DeliveryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn synthesized_ids_are_unique() {
        assert_ne!(DeliveryId::synthesize(), DeliveryId::synthesize());
    }
}
