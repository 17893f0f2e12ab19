// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Token revocation store (RFC 7009 backing state).
//!
//! Records are indexed independently by JWT ID and by SHA-256 content hash
//! so that opaque tokens revoke just as well as JWTs. Entries expire after
//! 30 days; a size cap evicts the oldest entries when exceeded.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: Option<String>,
    pub reason: String,
    pub token_kind: TokenKind,
    pub token_hash: String,
}

impl RevocationRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.revoked_at > Duration::days(RETENTION_DAYS)
    }
}

/// Process-wide concurrent revocation store.
pub struct RevocationStore {
    by_jti: DashMap<String, RevocationRecord>,
    by_hash: DashMap<String, RevocationRecord>,
    max_entries: usize,
}

/// SHA-256 hex digest of the raw token string.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extract the `jti` claim from a JWT without verifying the signature.
/// Returns `None` for opaque tokens or malformed JWTs.
pub fn extract_jti(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("jti")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Best-effort token kind from the unverified `type` claim.
fn detect_kind(token: &str, hint: Option<&str>) -> TokenKind {
    let claimed = token
        .split('.')
        .nth(1)
        .and_then(|payload| {
            use base64::Engine;
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(payload)
                .ok()
        })
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|claims| {
            claims
                .get("type")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        });

    match claimed.as_deref() {
        Some("refresh") => TokenKind::RefreshToken,
        Some(_) => TokenKind::AccessToken,
        None => match hint {
            Some("refresh_token") => TokenKind::RefreshToken,
            Some("access_token") => TokenKind::AccessToken,
            _ => TokenKind::Unknown,
        },
    }
}

impl RevocationStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            by_jti: DashMap::new(),
            by_hash: DashMap::new(),
            max_entries,
        }
    }

    /// Record a revocation. Keyed by JTI when extractable, always by hash.
    pub fn revoke(
        &self,
        token: &str,
        hint: Option<&str>,
        client_id: Option<&str>,
        reason: &str,
    ) -> RevocationRecord {
        let record = RevocationRecord {
            revoked_at: Utc::now(),
            revoked_by: client_id.map(str::to_string),
            reason: reason.to_string(),
            token_kind: detect_kind(token, hint),
            token_hash: token_hash(token),
        };

        if let Some(jti) = extract_jti(token) {
            self.by_jti.insert(jti, record.clone());
        }
        self.by_hash.insert(record.token_hash.clone(), record.clone());

        if self.by_hash.len() > self.max_entries {
            self.evict_oldest();
        }
        record
    }

    /// A token is unusable when either of its keys has an unexpired record.
    pub fn is_revoked(&self, token: &str) -> bool {
        let now = Utc::now();
        if let Some(jti) = extract_jti(token) {
            if let Some(record) = self.by_jti.get(&jti) {
                if !record.is_expired(now) {
                    return true;
                }
            }
        }
        self.by_hash
            .get(&token_hash(token))
            .map(|record| !record.is_expired(now))
            .unwrap_or(false)
    }

    /// Remove records past the 30-day retention window.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.by_hash.len();
        self.by_jti.retain(|_, record| !record.is_expired(now));
        self.by_hash.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.by_hash.len())
    }

    fn evict_oldest(&self) {
        let overflow = self.by_hash.len().saturating_sub(self.max_entries);
        if overflow == 0 {
            return;
        }
        let mut entries: Vec<(String, DateTime<Utc>)> = self
            .by_hash
            .iter()
            .map(|e| (e.key().clone(), e.value().revoked_at))
            .collect();
        entries.sort_by_key(|(_, at)| *at);
        for (hash, _) in entries.into_iter().take(overflow) {
            self.by_hash.remove(&hash);
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jwt(jti: &str) -> String {
        use base64::Engine;
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = engine.encode(format!(r#"{{"sub":"sarah.chen","jti":"{jti}"}}"#));
        format!("{header}.{payload}.fakesig")
    }

    #[test]
    fn test_revoked_jwt_is_visible_by_jti() {
        let store = RevocationStore::new(100);
        let token = make_jwt("token-1");
        assert!(!store.is_revoked(&token));

        store.revoke(&token, None, Some("client-a"), "client_request");
        assert!(store.is_revoked(&token));
    }

    #[test]
    fn test_opaque_token_revoked_by_hash() {
        let store = RevocationStore::new(100);
        let token = "opaque-bearer-token-value";
        store.revoke(token, Some("access_token"), None, "client_request");
        assert!(store.is_revoked(token));
        assert!(!store.is_revoked("some-other-token"));
    }

    #[test]
    fn test_unrelated_tokens_unaffected() {
        let store = RevocationStore::new(100);
        store.revoke(&make_jwt("a"), None, None, "test");
        assert!(!store.is_revoked(&make_jwt("b")));
    }

    #[test]
    fn test_size_cap_evicts_oldest() {
        let store = RevocationStore::new(5);
        for i in 0..10 {
            store.revoke(&format!("token-{i}"), None, None, "test");
        }
        assert!(store.len() <= 6);
    }

    #[test]
    fn test_jti_extraction_handles_garbage() {
        assert_eq!(extract_jti("not-a-jwt"), None);
        assert_eq!(extract_jti("a.%%%.c"), None);
        assert_eq!(extract_jti(&make_jwt("x")).as_deref(), Some("x"));
    }
}
