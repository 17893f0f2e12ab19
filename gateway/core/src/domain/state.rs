// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Request Workflow State
//!
//! The single mutable value-object that travels through the orchestration
//! graph for one request, plus the state manager that records every
//! transition for audit.
//!
//! # Invariants
//!
//! - `security_clearance` only advances forward or jumps to `Blocked`
//! - `retry_count` never exceeds [`MAX_RETRIES`]
//! - `audit_trail` is append-only within one request
//! - `query_results` is set only while clearance is `Approved`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::ResponseEnvelope;
use crate::domain::principal::Principal;

/// Retry budget for the query-execution node.
pub const MAX_RETRIES: u32 = 3;

/// Unique identifier for a single gateway request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of bearer-token validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Pending,
    Authenticated,
    TokenInvalid,
    Expired,
}

/// Monotonic clearance through the security layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityClearance {
    Pending,
    Layer1Passed,
    Layer2Passed,
    Layer3Passed,
    Approved,
    Blocked,
}

impl SecurityClearance {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Layer1Passed => 1,
            Self::Layer2Passed => 2,
            Self::Layer3Passed => 3,
            Self::Approved => 4,
            // Blocked is terminal, not ordered with the pass levels.
            Self::Blocked => u8::MAX,
        }
    }

    /// A transition is legal when it advances forward or lands on `Blocked`.
    /// Nothing leaves `Blocked`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == Self::Blocked {
            return false;
        }
        next == Self::Blocked || next.rank() >= self.rank()
    }
}

/// Classified intent of the user's question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryIntent {
    #[serde(rename = "COUNT")]
    Count,
    // Older planners emitted QUERY_RECORDS for plain record listings.
    #[serde(rename = "LIST", alias = "QUERY_RECORDS")]
    List,
    #[serde(rename = "COMPARE")]
    Compare,
    #[serde(rename = "ANALYZE")]
    Analyze,
    #[serde(rename = "META")]
    Meta,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::List => "LIST",
            Self::Compare => "COMPARE",
            Self::Analyze => "ANALYZE",
            Self::Meta => "META",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One recorded state transition, kept in the request's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub timestamp: DateTime<Utc>,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

/// The workflow's single mutable value-object for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    // Core processing
    pub request_id: RequestId,
    pub user_query: String,
    pub bearer_token: String,
    pub conversation_id: Option<String>,
    pub principal: Option<Principal>,

    // Authentication & authorization
    pub auth_status: AuthStatus,
    pub token_validated: bool,

    // Orchestration
    pub query_intent: Option<QueryIntent>,
    pub entities: Vec<crate::domain::query::Entity>,
    pub discovered_models: Vec<crate::domain::model::ModelDescriptor>,
    pub field_mappings: serde_json::Map<String, Value>,
    pub constructed_query: Option<crate::domain::query::CanonicalQuery>,

    // Security & compliance
    pub security_clearance: SecurityClearance,
    pub threat_assessment: Option<Value>,
    pub audit_trail: Vec<StateTransition>,

    // Results & response
    pub query_results: Option<Value>,
    pub formatted_response: Option<ResponseEnvelope>,

    // Proactive capabilities
    pub proactive_insights: Vec<Value>,
    pub follow_up_suggestions: Vec<String>,

    // Error handling
    pub error_state: Option<String>,
    pub retry_count: u32,

    // Performance tracking (seconds)
    pub processing_start_time: DateTime<Utc>,
    pub security_validation_time: f64,
    pub query_execution_time: f64,
}

impl RequestState {
    pub fn new(user_query: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            user_query: user_query.into(),
            bearer_token: bearer_token.into(),
            conversation_id: None,
            principal: None,
            auth_status: AuthStatus::Pending,
            token_validated: false,
            query_intent: None,
            entities: Vec::new(),
            discovered_models: Vec::new(),
            field_mappings: serde_json::Map::new(),
            constructed_query: None,
            security_clearance: SecurityClearance::Pending,
            threat_assessment: None,
            audit_trail: Vec::new(),
            query_results: None,
            formatted_response: None,
            proactive_insights: Vec::new(),
            follow_up_suggestions: Vec::new(),
            error_state: None,
            retry_count: 0,
            processing_start_time: Utc::now(),
            security_validation_time: 0.0,
            query_execution_time: 0.0,
        }
    }

    /// Whether any data-egress node may still run.
    pub fn is_blocked(&self) -> bool {
        self.security_clearance == SecurityClearance::Blocked
    }

    /// Remaining retry budget for the query-execution node.
    pub fn retries_remaining(&self) -> u32 {
        MAX_RETRIES.saturating_sub(self.retry_count)
    }
}

/// Records state transitions into the request's append-only trail.
///
/// Stateless apart from the trail it writes into the state itself; the
/// workflow executor owns the single mutable [`RequestState`].
#[derive(Debug, Default, Clone)]
pub struct StateManager;

impl StateManager {
    pub fn new() -> Self {
        Self
    }

    fn record(
        &self,
        state: &mut RequestState,
        from: String,
        to: String,
        event: &str,
        metadata: serde_json::Map<String, Value>,
    ) {
        state.audit_trail.push(StateTransition {
            timestamp: Utc::now(),
            from_state: from,
            to_state: to,
            event: event.to_string(),
            metadata,
        });
    }

    pub fn update_auth_status(&self, state: &mut RequestState, status: AuthStatus) {
        let from = format!("{:?}", state.auth_status);
        state.auth_status = status;
        state.token_validated = status == AuthStatus::Authenticated;
        self.record(
            state,
            from,
            format!("{status:?}"),
            "AUTH_UPDATE",
            serde_json::Map::new(),
        );
    }

    /// Advance the security clearance. Regressions are ignored (and logged
    /// into the trail as rejected) so that clearance stays monotonic.
    pub fn update_security_clearance(
        &self,
        state: &mut RequestState,
        clearance: SecurityClearance,
        metadata: serde_json::Map<String, Value>,
    ) -> bool {
        let current = state.security_clearance;
        if !current.can_transition_to(clearance) {
            tracing::warn!(
                request_id = %state.request_id,
                from = ?current,
                to = ?clearance,
                "rejected non-monotonic clearance transition"
            );
            let mut meta = serde_json::Map::new();
            meta.insert("rejected".into(), Value::Bool(true));
            self.record(
                state,
                format!("{current:?}"),
                format!("{clearance:?}"),
                "SECURITY_UPDATE_REJECTED",
                meta,
            );
            return false;
        }
        state.security_clearance = clearance;
        self.record(
            state,
            format!("{current:?}"),
            format!("{clearance:?}"),
            "SECURITY_UPDATE",
            metadata,
        );
        true
    }

    pub fn set_error_state(&self, state: &mut RequestState, kind: &str, detail: &str) {
        state.error_state = Some(kind.to_string());
        let mut metadata = serde_json::Map::new();
        metadata.insert("detail".into(), Value::String(detail.to_string()));
        self.record(
            state,
            "PROCESSING".into(),
            "ERROR".into(),
            "ERROR_OCCURRED",
            metadata,
        );
    }

    pub fn record_node(&self, state: &mut RequestState, node: &str, outcome: &str) {
        let mut metadata = serde_json::Map::new();
        metadata.insert("node".into(), Value::String(node.to_string()));
        self.record(
            state,
            node.to_uppercase(),
            outcome.to_string(),
            &format!("{}_{}", node.to_uppercase(), outcome),
            metadata,
        );
    }

    /// Store query results. Enforced here rather than at the call sites:
    /// results only ever land in an approved state.
    pub fn set_query_results(&self, state: &mut RequestState, results: Value) -> bool {
        if state.security_clearance != SecurityClearance::Approved {
            tracing::warn!(
                request_id = %state.request_id,
                clearance = ?state.security_clearance,
                "refused to store query results without approval"
            );
            return false;
        }
        state.query_results = Some(results);
        true
    }
}
