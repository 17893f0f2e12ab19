// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow node implementations.
//!
//! Each node transforms the request state and reports whether the graph
//! continues. Denials terminate with a structured response envelope; no
//! node unwinds across a node boundary.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::domain::errors::{GatewayError, ResponseEnvelope};
use crate::domain::llm::{GenerationOptions, LlmProvider};
use crate::domain::state::{
    AuthStatus, RequestState, SecurityClearance, StateManager,
};
use crate::domain::threat::{SecurityAction, ThreatLevel};
use crate::infrastructure::advisory::HybridAnalyzer;
use crate::infrastructure::audit::AuditHandle;
use crate::infrastructure::config::FeatureFlags;
use crate::infrastructure::oauth::OauthService;
use crate::infrastructure::threat::ThreatDetector;

use super::agents::extract_json;
use super::pipeline::{AgentPipeline, PipelineOutcome};

/// Whether the graph proceeds past a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Continue,
    Terminate,
    /// The request's cancellation token fired while the node was waiting
    /// on an external call.
    Cancelled,
}

pub struct WorkflowNodes {
    pub oauth: Arc<OauthService>,
    pub threat: Arc<ThreatDetector>,
    pub semantic: Arc<HybridAnalyzer>,
    pub pipeline: Arc<AgentPipeline>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub audit: AuditHandle,
    pub features: FeatureFlags,
    pub state_manager: StateManager,
}

impl WorkflowNodes {
    /// Bearer-token validation. Terminal on any failure. Remote
    /// introspection is raced against the cancellation token so a client
    /// disconnect aborts the in-flight call.
    pub async fn validate_bearer_token(
        &self,
        state: &mut RequestState,
        cancel: &CancellationToken,
    ) -> NodeOutcome {
        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return NodeOutcome::Cancelled,
            result = self.oauth.validate_token(&state.bearer_token) => result,
        };
        state.security_validation_time += started.elapsed().as_secs_f64();

        match result {
            Ok(principal) => {
                self.state_manager
                    .update_auth_status(state, AuthStatus::Authenticated);
                self.state_manager.update_security_clearance(
                    state,
                    SecurityClearance::Layer1Passed,
                    serde_json::Map::new(),
                );
                state.principal = Some(principal);
                NodeOutcome::Continue
            }
            Err(err) => {
                let status = match err {
                    GatewayError::AuthInvalid(ref detail) if detail.contains("expired") => {
                        AuthStatus::Expired
                    }
                    _ => AuthStatus::TokenInvalid,
                };
                self.state_manager.update_auth_status(state, status);
                self.state_manager.set_error_state(state, err.kind(), &err.to_string());
                state.formatted_response = Some(ResponseEnvelope::from(&err));
                self.audit.emit(
                    AuditEvent::new(AuditEventType::InvalidToken, AuditSeverity::Warning)
                        .failure()
                        .detail("error_kind", Value::String(err.kind().into())),
                );
                NodeOutcome::Terminate
            }
        }
    }

    /// Authorization gate: principals without data access are blocked
    /// before any egress node runs.
    pub fn check_user_authorization(&self, state: &mut RequestState) -> NodeOutcome {
        if !state.token_validated {
            self.state_manager
                .set_error_state(state, "AUTH_MISSING", "valid authentication required");
            state.formatted_response = Some(ResponseEnvelope::from(&GatewayError::AuthMissing));
            return NodeOutcome::Terminate;
        }

        let Some(principal) = state.principal.clone() else {
            state.formatted_response = Some(ResponseEnvelope::from(&GatewayError::AuthMissing));
            return NodeOutcome::Terminate;
        };

        if !principal.has_data_access {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "reason".into(),
                Value::String("NO_DATA_ACCESS_PRIVILEGE".into()),
            );
            self.state_manager.update_security_clearance(
                state,
                SecurityClearance::Blocked,
                metadata,
            );
            state.formatted_response = Some(
                ResponseEnvelope::new(
                    "SECURITY_BLOCKED",
                    "Your account does not have data access privileges.",
                )
                .with_guidance("Contact your administrator for data access.")
                .with_detail("reason", Value::String("NO_DATA_ACCESS_PRIVILEGE".into())),
            );
            self.audit.emit(
                AuditEvent::new(AuditEventType::AccessDenied, AuditSeverity::Warning)
                    .failure()
                    .user(&principal.subject)
                    .detail("reason", Value::String("NO_DATA_ACCESS_PRIVILEGE".into()))
                    .flag("access_denied"),
            );
            return NodeOutcome::Terminate;
        }

        self.state_manager.update_security_clearance(
            state,
            SecurityClearance::Layer2Passed,
            serde_json::Map::new(),
        );
        NodeOutcome::Continue
    }

    /// Layered security analysis: rule-based detection plus the hybrid
    /// semantic assessment. Ends in Approved, Blocked, or quarantine.
    /// The advisory LLM call inside the hybrid analyzer is raced against
    /// the cancellation token.
    pub async fn comprehensive_security_analysis(
        &self,
        state: &mut RequestState,
        cancel: &CancellationToken,
    ) -> NodeOutcome {
        let started = Instant::now();
        let client_id = state
            .principal
            .as_ref()
            .map(|p| p.subject.clone())
            .unwrap_or_else(|| "anonymous".into());

        let detection = self.threat.analyze(&state.user_query, Some(&client_id));
        let assessment = tokio::select! {
            _ = cancel.cancelled() => return NodeOutcome::Cancelled,
            assessment = self
                .semantic
                .analyze(&state.user_query, state.conversation_id.as_deref()) => assessment,
        };
        state.security_validation_time += started.elapsed().as_secs_f64();

        state.threat_assessment = Some(json!({
            "rule_detection": &detection,
            "semantic_assessment": &assessment,
        }));

        let semantic_blocks = assessment.is_threat
            && matches!(
                assessment.recommended_action,
                SecurityAction::BlockImmediately | SecurityAction::BlockWithWarning
            );

        if detection.should_block() || semantic_blocks {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "threat_level".into(),
                Value::String(detection.threat_level.as_str().into()),
            );
            metadata.insert("matched_rules".into(), json!(&detection.matched_rules));
            self.state_manager.update_security_clearance(
                state,
                SecurityClearance::Blocked,
                metadata,
            );

            state.formatted_response = Some(
                ResponseEnvelope::new(
                    "SECURITY_BLOCKED",
                    "This request was blocked by the security policy.",
                )
                .with_guidance("Rephrase your question as a plain business data query.")
                .with_detail(
                    "threat_level",
                    Value::String(detection.threat_level.as_str().into()),
                )
                .with_detail("matched_rules", json!(&detection.matched_rules)),
            );

            let severity = if detection.threat_level == ThreatLevel::Critical {
                AuditSeverity::Critical
            } else {
                AuditSeverity::Warning
            };
            self.audit.emit(
                AuditEvent::new(AuditEventType::JailbreakAttempt, severity)
                    .failure()
                    .user(&client_id)
                    .detail("matched_rules", json!(&detection.matched_rules))
                    .detail("confidence", json!(detection.confidence_score))
                    .detail("content_snippet", Value::String(detection.content_snippet))
                    .flag("jailbreak_attempt")
                    .flag("automated_detection"),
            );
            return NodeOutcome::Terminate;
        }

        if assessment.is_threat && assessment.recommended_action == SecurityAction::MonitorClosely {
            self.state_manager.update_security_clearance(
                state,
                SecurityClearance::Layer3Passed,
                serde_json::Map::new(),
            );
            state.formatted_response = Some(
                ResponseEnvelope::new(
                    "SECURITY_QUARANTINE",
                    "This request requires additional review before processing.",
                )
                .with_detail("combined_confidence", json!(assessment.combined_confidence)),
            );
            self.audit.emit(
                AuditEvent::new(AuditEventType::SuspiciousActivity, AuditSeverity::Warning)
                    .failure()
                    .user(&client_id)
                    .detail("combined_confidence", json!(assessment.combined_confidence))
                    .flag("quarantined"),
            );
            return NodeOutcome::Terminate;
        }

        self.state_manager.update_security_clearance(
            state,
            SecurityClearance::Approved,
            serde_json::Map::new(),
        );
        NodeOutcome::Continue
    }

    /// One pipeline attempt. Retry policy lives in the workflow engine.
    pub async fn execute_query_once(
        &self,
        state: &RequestState,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, GatewayError> {
        self.pipeline
            .process(&state.user_query, state.principal.as_ref(), cancel)
            .await
    }

    /// Project the pipeline outcome into the formatted response.
    pub fn generate_response(&self, state: &mut RequestState) -> NodeOutcome {
        let Some(results) = &state.query_results else {
            // Response generation must always produce something readable.
            state.formatted_response = Some(
                ResponseEnvelope::new("INTERNAL", "The request completed without results.")
                    .with_guidance("Try rephrasing your question."),
            );
            return NodeOutcome::Continue;
        };

        let response_type = results
            .pointer("/response/response_type")
            .and_then(Value::as_str)
            .unwrap_or("LIST")
            .to_string();
        let message = results
            .pointer("/response/message")
            .and_then(Value::as_str)
            .unwrap_or("Your query completed.")
            .to_string();

        let mut envelope = ResponseEnvelope::new(response_type, message);
        if let Some(count) = results.pointer("/response/count") {
            envelope = envelope.with_detail("count", count.clone());
        }
        if let Some(item_count) = results.pointer("/response/item_count") {
            envelope = envelope.with_detail("item_count", item_count.clone());
        }
        state.formatted_response = Some(envelope);
        self.state_manager.record_node(state, "generate_response", "COMPLETED");
        NodeOutcome::Continue
    }

    /// Optional proactive insights; failures and cancellation degrade to
    /// an empty list.
    pub async fn generate_insights(&self, state: &mut RequestState, cancel: &CancellationToken) {
        if !self.features.proactive_insights {
            return;
        }
        let Some(llm) = &self.llm else { return };
        let Some(results) = &state.query_results else { return };

        let prompt = format!(
            "Given this answered data query, suggest up to 3 short insights \
             relevant to a business user.\nQuery: {}\nResults: {}\n\
             Respond with a JSON array of objects {{\"title\": \"...\", \"detail\": \"...\"}}.",
            state.user_query,
            results.pointer("/response/message").and_then(Value::as_str).unwrap_or("")
        );
        let options = GenerationOptions::default();
        let generated = tokio::select! {
            _ = cancel.cancelled() => return,
            generated = llm.generate(&prompt, &options) => generated,
        };
        if let Ok(response) = generated {
            if let Some(Value::Array(insights)) = extract_json(&response.text) {
                state.proactive_insights = insights.into_iter().take(3).collect();
            }
        }
    }

    /// Optional follow-up suggestions; failures and cancellation degrade
    /// to an empty list.
    pub async fn suggest_follow_ups(&self, state: &mut RequestState, cancel: &CancellationToken) {
        if !self.features.follow_up_suggestions {
            return;
        }
        let Some(llm) = &self.llm else { return };
        let Some(results) = &state.query_results else { return };

        let prompt = format!(
            "Given this answered data query, suggest up to 3 follow-up \
             questions that deepen the analysis.\nQuery: {}\nResults: {}\n\
             Respond with a JSON array of strings.",
            state.user_query,
            results.pointer("/response/message").and_then(Value::as_str).unwrap_or("")
        );
        let options = GenerationOptions::default();
        let generated = tokio::select! {
            _ = cancel.cancelled() => return,
            generated = llm.generate(&prompt, &options) => generated,
        };
        if let Ok(response) = generated {
            if let Some(Value::Array(items)) = extract_json(&response.text) {
                state.follow_up_suggestions = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .take(3)
                    .collect();
            }
        }
    }
}
