//! Bearer-token authentication.
//!
//! Tokens live in a JSON file of SHA-256 hashes loaded once at startup;
//! the store is read-only at runtime (provisioning happens out of band).
//! Connections from the loopback interface bypass the store entirely and
//! are treated as an admin identity.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// One provisioned client token (hashed at rest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token_sha256: String,
    pub client_name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// The identity a validated token (or localhost bypass) resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub client_name: String,
    pub is_admin: bool,
}

impl TokenIdentity {
    /// Synthesized identity for loopback connections.
    pub fn localhost() -> Self {
        Self {
            client_name: "localhost-user".into(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: Vec<StoredToken>,
}

impl TokenStore {
    /// Load the store from disk. A missing file yields an empty store (only
    /// localhost can authenticate); a malformed file is treated the same,
    /// loudly.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            warn!(?path, "token file not found — remote clients cannot authenticate");
            return Self::default();
        };
        match serde_json::from_str::<Vec<StoredToken>>(&raw) {
            Ok(tokens) => {
                info!(?path, count = tokens.len(), "token store loaded");
                Self { tokens }
            }
            Err(e) => {
                warn!(?path, "token file unreadable ({e}) — using empty store");
                Self::default()
            }
        }
    }

    pub fn from_tokens(tokens: Vec<StoredToken>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Resolve a presented bearer string to an identity, if it matches a
    /// non-revoked stored hash.
    pub fn validate(&self, presented: &str) -> Option<TokenIdentity> {
        let hash = sha256_hex(presented);
        self.tokens
            .iter()
            .find(|t| !t.is_revoked && t.token_sha256 == hash)
            .map(|t| TokenIdentity {
                client_name: t.client_name.clone(),
                is_admin: t.is_admin,
            })
    }
}

pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
