// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OAuth 2.1 resource server.
//!
//! Validates bearer tokens either by remote introspection or by local
//! signature verification, projects claims into a [`Principal`] via the
//! configured subject table, and implements RFC 7009 revocation backed by
//! the revocation store. The gateway never mints primary credentials.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::domain::errors::GatewayError;
use crate::domain::principal::{Principal, Role};
use crate::infrastructure::audit::AuditHandle;
use crate::infrastructure::config::OauthConfig;
use crate::infrastructure::revocation::{RevocationRecord, RevocationStore};

const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
    #[serde(default)]
    iat: Option<usize>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteIntrospection {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    scope: Option<String>,
}

/// RFC 7662 wire response plus gateway extensions.
#[derive(Debug, Clone, Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    // Gateway extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_data_access: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_compliance: Option<String>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self {
            active: false,
            client_id: None,
            username: None,
            scope: None,
            exp: None,
            iat: None,
            sub: None,
            aud: None,
            iss: None,
            token_type: None,
            role: None,
            permissions: None,
            has_data_access: None,
            mcp_compliance: None,
        }
    }
}

pub struct OauthService {
    config: OauthConfig,
    revocations: Arc<RevocationStore>,
    http: reqwest::Client,
    audit: AuditHandle,
}

impl OauthService {
    pub fn new(config: OauthConfig, revocations: Arc<RevocationStore>, audit: AuditHandle) -> Self {
        let http = reqwest::Client::builder()
            .timeout(INTROSPECTION_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            revocations,
            http,
            audit,
        }
    }

    pub fn revocations(&self) -> &RevocationStore {
        &self.revocations
    }

    /// Strip the `Bearer ` prefix; anything else is a missing credential.
    pub fn extract_bearer(authorization: Option<&str>) -> Result<&str, GatewayError> {
        let header = authorization.ok_or(GatewayError::AuthMissing)?;
        let token = header.strip_prefix("Bearer ").unwrap_or("");
        if token.is_empty() {
            return Err(GatewayError::AuthMissing);
        }
        Ok(token)
    }

    /// Validate a raw bearer token and project it into a principal.
    pub async fn validate_token(&self, token: &str) -> Result<Principal, GatewayError> {
        if token.is_empty() {
            return Err(GatewayError::AuthMissing);
        }

        if self.revocations.is_revoked(token) {
            self.audit.emit(
                AuditEvent::new(AuditEventType::InvalidToken, AuditSeverity::Warning)
                    .failure()
                    .detail("reason", Value::String("token_revoked".into()))
                    .flag("revoked_token_presented"),
            );
            return Err(GatewayError::AuthRevoked);
        }

        let subject = if let Some(url) = &self.config.introspection_url {
            self.introspect_remote(url, token).await?
        } else {
            self.verify_local(token)?
        };

        Ok(self.project_subject(&subject))
    }

    /// Validate the `Authorization` header of an incoming request.
    pub async fn validate_bearer(
        &self,
        authorization: Option<&str>,
    ) -> Result<Principal, GatewayError> {
        let token = Self::extract_bearer(authorization)?;
        self.validate_token(token).await
    }

    async fn introspect_remote(&self, url: &str, token: &str) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::AuthInvalid("introspection timed out".into())
                } else {
                    GatewayError::AuthInvalid(format!("introspection unreachable: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::AuthInvalid(format!(
                "introspection returned {}",
                response.status()
            )));
        }

        let info: RemoteIntrospection = response
            .json()
            .await
            .map_err(|e| GatewayError::AuthInvalid(format!("introspection body: {e}")))?;

        if !info.active {
            return Err(GatewayError::AuthInvalid("token is not active".into()));
        }
        if let Some(aud) = &info.aud {
            if aud != &self.config.audience {
                return Err(GatewayError::AuthInvalid("audience mismatch".into()));
            }
        }
        if let Some(iss) = &info.iss {
            if iss != &self.config.issuer {
                return Err(GatewayError::AuthInvalid("issuer mismatch".into()));
            }
        }
        info.sub
            .ok_or_else(|| GatewayError::AuthInvalid("introspection carried no subject".into()))
    }

    fn verify_local(&self, token: &str) -> Result<String, GatewayError> {
        let secret = self
            .config
            .jwt_secret
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("no token verifier configured".into()))?;

        let algorithm = match self.config.algorithm.as_str() {
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            _ => Algorithm::HS256,
        };
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);

        let decoded = decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                GatewayError::AuthInvalid("token expired".into())
            }
            _ => GatewayError::AuthInvalid(e.to_string()),
        })?;

        Ok(decoded.claims.sub)
    }

    /// Project a validated subject into a principal via the subject table.
    /// Unknown subjects get role `unknown` with no permissions.
    fn project_subject(&self, subject: &str) -> Principal {
        match self.config.subjects.get(subject) {
            Some(entry) => {
                let mut principal = Principal::project(subject, &entry.scopes);
                if let Some(role) = entry.role {
                    principal.role = role;
                }
                principal
            }
            None => Principal::unknown(subject),
        }
    }

    /// Full introspection for the `/oauth/introspect` surface.
    pub async fn introspect(&self, token: &str) -> IntrospectionResponse {
        match self.validate_token(token).await {
            Ok(principal) => {
                let (exp, iat, jti) = unverified_times(token);
                IntrospectionResponse {
                    active: true,
                    client_id: jti,
                    username: Some(principal.subject.clone()),
                    scope: Some(principal.scopes.join(" ")),
                    exp,
                    iat,
                    sub: Some(principal.subject.clone()),
                    aud: Some(self.config.audience.clone()),
                    iss: Some(self.config.issuer.clone()),
                    token_type: Some("Bearer".into()),
                    role: Some(principal.role),
                    permissions: Some(
                        principal
                            .permissions
                            .iter()
                            .map(|p| p.as_str().to_string())
                            .collect(),
                    ),
                    has_data_access: Some(principal.has_data_access),
                    mcp_compliance: Some("2025-06-18".into()),
                }
            }
            Err(_) => IntrospectionResponse::inactive(),
        }
    }

    /// Verify HTTP Basic client credentials in constant time.
    pub fn verify_client(&self, client_id: &str, client_secret: &str) -> Result<(), GatewayError> {
        let expected = self
            .config
            .clients
            .get(client_id)
            .ok_or_else(|| GatewayError::AuthInvalid("unknown client".into()))?;
        let matches: bool = expected
            .as_bytes()
            .ct_eq(client_secret.as_bytes())
            .into();
        if matches {
            Ok(())
        } else {
            Err(GatewayError::AuthInvalid("bad client secret".into()))
        }
    }

    /// RFC 7009 revocation. Always reports success to the caller; internal
    /// failures are audited but never surfaced.
    pub fn revoke_token(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
        client_id: &str,
    ) -> RevocationRecord {
        let record = self
            .revocations
            .revoke(token, token_type_hint, Some(client_id), "client_request");
        self.audit.emit(
            AuditEvent::new(AuditEventType::TokenRevocation, AuditSeverity::Info)
                .client(client_id)
                .detail("token_kind", serde_json::json!(record.token_kind))
                .detail("reason", Value::String(record.reason.clone())),
        );
        record
    }
}

/// Unverified `exp`/`iat`/`client_id` lift for introspection echo only.
fn unverified_times(token: &str) -> (Option<usize>, Option<usize>, Option<String>) {
    use base64::Engine;
    let claims = token
        .split('.')
        .nth(1)
        .and_then(|payload| {
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(payload)
                .ok()
        })
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
    match claims {
        Some(claims) => (
            claims.get("exp").and_then(Value::as_u64).map(|v| v as usize),
            claims.get("iat").and_then(Value::as_u64).map(|v| v as usize),
            claims
                .get("client_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        None => (None, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::SubjectEntry;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        aud: String,
        iss: String,
        exp: usize,
        iat: usize,
        jti: String,
    }

    fn make_token(sub: &str) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            aud: "datagate".into(),
            iss: "https://auth.test".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            iat: chrono::Utc::now().timestamp() as usize,
            jti: format!("jti-{sub}"),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn service() -> OauthService {
        let mut config = OauthConfig {
            issuer: "https://auth.test".into(),
            audience: "datagate".into(),
            jwt_secret: Some(SECRET.into()),
            algorithm: "HS256".into(),
            ..Default::default()
        };
        config.subjects.insert(
            "sarah.chen".into(),
            SubjectEntry {
                scopes: vec!["read:all".into()],
                role: None,
            },
        );
        config.subjects.insert(
            "alex.smith".into(),
            SubjectEntry {
                scopes: vec!["none".into()],
                role: None,
            },
        );
        config
            .clients
            .insert("gateway-client".into(), "client-secret".into());
        OauthService::new(config, Arc::new(RevocationStore::new(1000)), AuditHandle::disabled())
    }

    #[tokio::test]
    async fn test_valid_token_projects_principal() {
        let service = service();
        let token = make_token("sarah.chen");
        let principal = service
            .validate_bearer(Some(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(principal.role, Role::Executive);
        assert!(principal.has_data_access);
    }

    #[tokio::test]
    async fn test_missing_header_is_auth_missing() {
        let service = service();
        let err = service.validate_bearer(None).await.unwrap_err();
        assert_eq!(err.kind(), "AUTH_MISSING");
        let err = service
            .validate_bearer(Some("Basic dXNlcjpwYXNz"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AUTH_MISSING");
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let service = service();
        let err = service
            .validate_bearer(Some("Bearer not-a-jwt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AUTH_INVALID");
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let service = service();
        let claims = TestClaims {
            sub: "sarah.chen".into(),
            aud: "someone-else".into(),
            iss: "https://auth.test".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            iat: chrono::Utc::now().timestamp() as usize,
            jti: "j".into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        let err = service
            .validate_bearer(Some(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AUTH_INVALID");
    }

    #[tokio::test]
    async fn test_revoked_token_rejected_even_with_valid_signature() {
        let service = service();
        let token = make_token("sarah.chen");
        assert!(service.validate_token(&token).await.is_ok());

        service.revoke_token(&token, None, "gateway-client");
        let err = service.validate_token(&token).await.unwrap_err();
        assert_eq!(err.kind(), "AUTH_REVOKED");

        // An unrelated subject's token is unaffected.
        let other = make_token("alex.smith");
        assert!(service.validate_token(&other).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_subject_maps_to_unknown_role() {
        let service = service();
        let token = make_token("who.is.this");
        let principal = service.validate_token(&token).await.unwrap();
        assert_eq!(principal.role, Role::Unknown);
        assert!(principal.permissions.is_empty());
        assert!(!principal.has_data_access);
    }

    #[tokio::test]
    async fn test_introspection_response_shape() {
        let service = service();
        let token = make_token("sarah.chen");
        let response = service.introspect(&token).await;
        assert!(response.active);
        assert_eq!(response.username.as_deref(), Some("sarah.chen"));
        assert_eq!(response.role, Some(Role::Executive));
        assert_eq!(response.has_data_access, Some(true));
        assert_eq!(response.mcp_compliance.as_deref(), Some("2025-06-18"));
        assert!(response.exp.is_some());

        let inactive = service.introspect("garbage").await;
        assert!(!inactive.active);
        assert!(inactive.sub.is_none());
    }

    #[test]
    fn test_client_credentials_constant_time_check() {
        let service = service();
        assert!(service.verify_client("gateway-client", "client-secret").is_ok());
        assert!(service.verify_client("gateway-client", "wrong").is_err());
        assert!(service.verify_client("nobody", "client-secret").is_err());
    }

    #[tokio::test]
    async fn test_remote_introspection_path() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/introspect")
            .with_status(200)
            .with_body(
                r#"{"active": true, "sub": "sarah.chen",
                    "aud": "datagate", "iss": "https://auth.test"}"#,
            )
            .create_async()
            .await;

        let mut config = OauthConfig {
            introspection_url: Some(format!("{}/oauth/introspect", server.url())),
            issuer: "https://auth.test".into(),
            audience: "datagate".into(),
            jwt_secret: None,
            algorithm: "HS256".into(),
            ..Default::default()
        };
        config.subjects.insert(
            "sarah.chen".into(),
            SubjectEntry {
                scopes: vec!["read:all".into()],
                role: None,
            },
        );
        let service = OauthService::new(
            config,
            Arc::new(RevocationStore::new(100)),
            AuditHandle::disabled(),
        );

        let principal = service.validate_token("opaque-token").await.unwrap();
        assert_eq!(principal.subject, "sarah.chen");
        assert_eq!(principal.role, Role::Executive);
    }
}
