use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Single-use, time-boxed token authorizing a protected reload of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nonce {
    pub id: String,
    pub step_id: String,
    /// Expiry as epoch seconds.
    pub expires: i64,
}

impl Nonce {
    pub fn new(step_id: impl Into<String>, expires: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_id: step_id.into(),
            expires,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires
    }
}

/// Validity envelope kept in the local key-value store. Small on purpose:
/// everything needed to decide whether the remote session is worth fetching,
/// plus the outstanding nonces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    /// Expiry as epoch seconds.
    pub expires: i64,
    pub version: String,
    #[serde(default)]
    pub nonces: Vec<Nonce>,
}

impl SessionMeta {
    pub fn add_nonce(&mut self, nonce: Nonce) {
        self.nonces.push(nonce);
    }

    pub fn remove_nonce(&mut self, nonce_id: &str) {
        self.nonces.retain(|nonce| nonce.id != nonce_id);
    }

    pub fn nonce(&self, nonce_id: &str) -> Option<&Nonce> {
        self.nonces.iter().find(|nonce| nonce.id == nonce_id)
    }

    pub fn nonce_by_step(&self, step_id: &str) -> Option<&Nonce> {
        self.nonces.iter().find(|nonce| nonce.step_id == step_id)
    }
}
