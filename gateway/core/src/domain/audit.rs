// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit event aggregate and taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Enumerated audit event types. The wire strings are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // OAuth events
    ClientRegistration,
    AuthorizationRequest,
    TokenExchange,
    TokenRefresh,
    TokenRevocation,

    // API events
    ApiRequest,
    ApiSuccess,
    ApiFailure,

    // Security events
    RateLimitExceeded,
    InvalidToken,
    AccessDenied,
    JailbreakAttempt,
    SuspiciousActivity,

    // System events
    ServerStartup,
    ServerShutdown,
    SecurityAlert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One structured, append-only audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_flags: Vec<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, severity: AuditSeverity) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            severity,
            user_id: None,
            client_id: None,
            ip_address: None,
            user_agent: None,
            endpoint: None,
            method: None,
            success: true,
            response_code: None,
            processing_time_ms: None,
            details: serde_json::Map::new(),
            security_flags: Vec::new(),
        }
    }

    pub fn failure(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.method = Some(method.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.security_flags.push(flag.into());
        self
    }
}
