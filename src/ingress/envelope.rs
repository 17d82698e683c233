//! The minimal webhook envelope every event must carry.

use serde::Deserialize;
use tracing::debug;

use crate::types::Repository;

/// Fields common to all webhook payloads the ingress consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseEnvelope {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub installation: Installation,
    #[serde(default)]
    pub repository: RepositoryEnvelope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Installation {
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryEnvelope {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub login: String,
}

impl BaseEnvelope {
    /// True when every identifying field is present. Incomplete envelopes
    /// are observed and dropped, never enqueued.
    pub fn is_valid(&self) -> bool {
        if self.installation.id == 0 {
            debug!("no installation.id present in request");
            return false;
        }
        if self.repository.node_id.is_empty() {
            debug!("no repository.node_id present in request");
            return false;
        }
        if self.repository.full_name.is_empty() {
            debug!("no repository.full_name present in request");
            return false;
        }
        if self.repository.name.is_empty() {
            debug!("no repository.name present in request");
            return false;
        }
        if self.repository.owner.login.is_empty() {
            debug!("no repository.owner.login present in request");
            return false;
        }
        true
    }

    /// The domain repository handle carried into work items.
    pub fn repository(&self) -> Repository {
        Repository {
            full_name: self.repository.full_name.clone(),
            name: self.repository.name.clone(),
            node_id: self.repository.node_id.clone(),
            owner_name: self.repository.owner.login.clone(),
            private: self.repository.private,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> serde_json::Value {
        json!({
            "action": "opened",
            "installation": { "id": 7 },
            "repository": {
                "node_id": "R_abc",
                "full_name": "acme/svc",
                "name": "svc",
                "owner": { "login": "acme" },
                "private": false
            }
        })
    }

    #[test]
    fn complete_envelope_is_valid() {
        let envelope: BaseEnvelope = serde_json::from_value(complete()).unwrap();
        assert!(envelope.is_valid());

        let repo = envelope.repository();
        assert_eq!(repo.full_name, "acme/svc");
        assert_eq!(repo.owner_name, "acme");
        assert_eq!(repo.node_id, "R_abc");
    }

    #[test]
    fn missing_installation_is_invalid() {
        let mut value = complete();
        value["installation"] = json!({});
        let envelope: BaseEnvelope = serde_json::from_value(value).unwrap();
        assert!(!envelope.is_valid());
    }

    #[test]
    fn missing_repository_fields_are_invalid() {
        for field in ["node_id", "full_name", "name"] {
            let mut value = complete();
            value["repository"][field] = json!("");
            let envelope: BaseEnvelope = serde_json::from_value(value).unwrap();
            assert!(!envelope.is_valid(), "{field} should be required");
        }

        let mut value = complete();
        value["repository"]["owner"] = json!({});
        let envelope: BaseEnvelope = serde_json::from_value(value).unwrap();
        assert!(!envelope.is_valid());
    }

    #[test]
    fn entirely_empty_payload_deserializes() {
        let envelope: BaseEnvelope = serde_json::from_str("{}").unwrap();
        assert!(!envelope.is_valid());
    }
}
