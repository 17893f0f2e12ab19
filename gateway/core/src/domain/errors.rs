// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway error taxonomy.
//!
//! Every failure that can cross a component boundary is one of these
//! variants. The `kind()` strings are stable identifiers used in audit
//! events, JSON responses, and tests; they never change once shipped.

use serde::{Deserialize, Serialize};

/// Errors produced by the request-processing plane.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Bearer token required")]
    AuthMissing,

    #[error("Invalid or expired Bearer token")]
    AuthInvalid(String),

    #[error("Token has been revoked")]
    AuthRevoked,

    #[error("Insufficient scope: {required} required")]
    InsufficientScope { required: String },

    #[error("Request blocked by security policy: {reason}")]
    SecurityBlocked { reason: String },

    #[error("Request quarantined pending review: {reason}")]
    SecurityQuarantine { reason: String },

    #[error("Rate limit exceeded, retry in {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Unable to understand the query: {0}")]
    QueryAnalysisFailed(String),

    #[error("No relevant data models found")]
    ModelNotFound,

    #[error("Field mapping confidence too low for: {0}")]
    FieldMappingLowConfidence(String),

    #[error("Constructed query is invalid: {0}")]
    QueryBuildInvalid(String),

    #[error("Master data hub rejected the configured credentials")]
    MdhUnauthorized,

    #[error("Master data hub call timed out")]
    MdhTimeout,

    #[error("Upstream returned data we could not parse: {0}")]
    MdhParseError(String),

    #[error("Master data hub upstream error: {0}")]
    MdhUpstreamError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable taxonomy identifier for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthMissing => "AUTH_MISSING",
            Self::AuthInvalid(_) => "AUTH_INVALID",
            Self::AuthRevoked => "AUTH_REVOKED",
            Self::InsufficientScope { .. } => "AUTH_INSUFFICIENT_SCOPE",
            Self::SecurityBlocked { .. } => "SECURITY_BLOCKED",
            Self::SecurityQuarantine { .. } => "SECURITY_QUARANTINE",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::QueryAnalysisFailed(_) => "QUERY_ANALYSIS_FAILED",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
            Self::FieldMappingLowConfidence(_) => "FIELD_MAPPING_LOW_CONFIDENCE",
            Self::QueryBuildInvalid(_) => "QUERY_BUILD_INVALID",
            Self::MdhUnauthorized => "MDH_UNAUTHORIZED",
            Self::MdhTimeout => "MDH_TIMEOUT",
            Self::MdhParseError(_) => "MDH_PARSE_ERROR",
            Self::MdhUpstreamError(_) => "MDH_UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Transient errors may be retried inside the query-execution node.
    /// Authentication, authorization, and parse failures never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MdhTimeout | Self::MdhUpstreamError(_))
    }
}

/// Uniform user-visible response envelope.
///
/// Always carries a stable `response_type` and a human-readable `message`;
/// never stack traces, upstream credentials, or token material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub response_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_guidance: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ResponseEnvelope {
    pub fn new(response_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_type: response_type.into(),
            message: message.into(),
            user_guidance: None,
            details: serde_json::Map::new(),
        }
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.user_guidance = Some(guidance.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

impl From<&GatewayError> for ResponseEnvelope {
    fn from(err: &GatewayError) -> Self {
        let guidance = match err {
            GatewayError::AuthMissing | GatewayError::AuthInvalid(_) => {
                Some("Obtain a valid access token and retry with an Authorization: Bearer header.")
            }
            GatewayError::AuthRevoked => Some("The presented token was revoked; request a new one."),
            GatewayError::InsufficientScope { .. } => {
                Some("Contact your administrator for data access.")
            }
            GatewayError::RateLimitExceeded { .. } => {
                Some("Reduce request frequency and honour the Retry-After header.")
            }
            GatewayError::ModelNotFound => {
                Some("Try rephrasing the question or ask which data models are available.")
            }
            GatewayError::MdhTimeout | GatewayError::MdhUpstreamError(_) => {
                Some("The data hub is temporarily unavailable; try again shortly.")
            }
            _ => None,
        };
        let mut envelope = ResponseEnvelope::new(err.kind(), err.to_string());
        envelope.user_guidance = guidance.map(str::to_string);
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(GatewayError::AuthMissing.kind(), "AUTH_MISSING");
        assert_eq!(GatewayError::AuthRevoked.kind(), "AUTH_REVOKED");
        assert_eq!(
            GatewayError::RateLimitExceeded { retry_after: 10 }.kind(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(GatewayError::ModelNotFound.kind(), "MODEL_NOT_FOUND");
        assert_eq!(
            GatewayError::MdhParseError("bad xml".into()).kind(),
            "MDH_PARSE_ERROR"
        );
    }

    #[test]
    fn test_only_upstream_failures_are_transient() {
        assert!(GatewayError::MdhTimeout.is_transient());
        assert!(GatewayError::MdhUpstreamError("503".into()).is_transient());
        assert!(!GatewayError::MdhUnauthorized.is_transient());
        assert!(!GatewayError::MdhParseError("x".into()).is_transient());
        assert!(!GatewayError::AuthInvalid("x".into()).is_transient());
    }

    #[test]
    fn test_envelope_from_error_carries_kind() {
        let err = GatewayError::SecurityBlocked {
            reason: "policy".into(),
        };
        let envelope = ResponseEnvelope::from(&err);
        assert_eq!(envelope.response_type, "SECURITY_BLOCKED");
        assert!(envelope.message.contains("policy"));
    }

    #[test]
    fn test_envelope_never_leaks_token_material() {
        let err = GatewayError::AuthInvalid("signature mismatch".into());
        let envelope = ResponseEnvelope::from(&err);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("signature mismatch"));
    }
}
