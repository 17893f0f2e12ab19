// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Engine Application Service
//!
//! Drives one request through the orchestration graph:
//!
//! ```text
//! validate_bearer_token → check_user_authorization →
//! comprehensive_security_analysis → execute_query → generate_response →
//! [generate_insights] → [suggest_follow_ups] → end
//! ```
//!
//! Failure at any guarded edge terminates with the appropriate structured
//! response. Only `execute_query` retries, and only on transient hub
//! errors, with exponential backoff (base 250 ms, factor 2, cap 4 s).
//! Every node honours the request's cancellation token; client disconnects
//! abort in-flight external calls.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::errors::{GatewayError, ResponseEnvelope};
use crate::domain::state::{RequestState, SecurityClearance};

use super::nodes::{NodeOutcome, WorkflowNodes};

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(4);

pub struct WorkflowEngine {
    nodes: WorkflowNodes,
}

impl WorkflowEngine {
    pub fn new(nodes: WorkflowNodes) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &WorkflowNodes {
        &self.nodes
    }

    fn backoff(attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        RETRY_BASE.saturating_mul(factor).min(RETRY_CAP)
    }

    /// Run one request to completion. Always returns the final state with
    /// a non-empty `formatted_response`.
    pub async fn run(&self, mut state: RequestState, cancel: CancellationToken) -> RequestState {
        let manager = &self.nodes.state_manager;

        match self.nodes.validate_bearer_token(&mut state, &cancel).await {
            NodeOutcome::Terminate => return self.finish(state),
            NodeOutcome::Cancelled => return self.cancelled(state),
            NodeOutcome::Continue => {}
        }
        if cancel.is_cancelled() {
            return self.cancelled(state);
        }

        if self.nodes.check_user_authorization(&mut state) == NodeOutcome::Terminate {
            return self.finish(state);
        }
        if cancel.is_cancelled() {
            return self.cancelled(state);
        }

        match self
            .nodes
            .comprehensive_security_analysis(&mut state, &cancel)
            .await
        {
            NodeOutcome::Terminate => return self.finish(state),
            NodeOutcome::Cancelled => return self.cancelled(state),
            NodeOutcome::Continue => {}
        }
        debug_assert_eq!(state.security_clearance, SecurityClearance::Approved);

        // execute_query: the only retryable node.
        let started = std::time::Instant::now();
        let outcome = loop {
            if cancel.is_cancelled() {
                return self.cancelled(state);
            }
            let attempt = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.nodes.execute_query_once(&state, &cancel) => Some(result),
            };
            let Some(attempt) = attempt else {
                return self.cancelled(state);
            };
            match attempt {
                Ok(outcome) => break Ok(outcome),
                Err(err) if err.is_transient() && state.retries_remaining() > 0 => {
                    let backoff = Self::backoff(state.retry_count);
                    state.retry_count += 1;
                    tracing::warn!(
                        request_id = %state.request_id,
                        error = %err,
                        retry = state.retry_count,
                        "transient hub error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return self.cancelled(state),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => break Err(err),
            }
        };
        state.query_execution_time = started.elapsed().as_secs_f64();

        match outcome {
            Ok(outcome) => {
                state.query_intent = Some(outcome.intent);
                state.entities = outcome.entities.clone();
                state.discovered_models = outcome.discovered_models.clone();
                state.field_mappings = outcome.field_mappings.clone();
                state.constructed_query = outcome.constructed_query.clone();
                let results = serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null);
                manager.set_query_results(&mut state, results);
                manager.record_node(&mut state, "execute_query", "COMPLETED");
            }
            Err(err) => {
                manager.set_error_state(&mut state, err.kind(), &err.to_string());
                state.formatted_response = Some(ResponseEnvelope::from(&err));
                self.audit_failure(&state, &err);
                return self.finish(state);
            }
        }

        self.nodes.generate_response(&mut state);
        self.nodes.generate_insights(&mut state, &cancel).await;
        self.nodes.suggest_follow_ups(&mut state, &cancel).await;
        self.finish(state)
    }

    fn cancelled(&self, mut state: RequestState) -> RequestState {
        self.nodes.state_manager.set_error_state(
            &mut state,
            "INTERNAL",
            "request cancelled by client",
        );
        state.formatted_response = Some(ResponseEnvelope::new(
            "INTERNAL",
            "The request was cancelled before completion.",
        ));
        state
    }

    fn audit_failure(&self, state: &RequestState, err: &GatewayError) {
        use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
        self.nodes.audit.emit(
            AuditEvent::new(AuditEventType::ApiFailure, AuditSeverity::Error)
                .failure()
                .user(
                    state
                        .principal
                        .as_ref()
                        .map(|p| p.subject.as_str())
                        .unwrap_or("anonymous"),
                )
                .detail("error_kind", serde_json::Value::String(err.kind().into()))
                .detail(
                    "retries",
                    serde_json::Value::from(state.retry_count),
                ),
        );
    }

    fn finish(&self, mut state: RequestState) -> RequestState {
        if state.formatted_response.is_none() {
            state.formatted_response = Some(ResponseEnvelope::new(
                "INTERNAL",
                "The request finished without a response.",
            ));
        }
        state
    }
}
