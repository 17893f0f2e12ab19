// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP presentation surface.
//!
//! One JSON-RPC endpoint (`/mcp`) plus the OAuth introspection/revocation
//! endpoints, liveness, resource-server metadata, and the whitelist-
//! bypassing rate-limit self-test. The security middleware applies rate
//! limiting and request-metadata threat screening to everything; rate-limit
//! headers are attached to every response regardless of which layer denied.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::application::workflow::WorkflowEngine;
use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::domain::errors::GatewayError;
use crate::domain::principal::{Permission, Principal};
use crate::domain::state::RequestState;
use crate::infrastructure::audit::AuditHandle;
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::datahub::{
    unauthorized_troubleshooting, DataHubClient, RecordFilter, RecordQueryParams,
};
use crate::infrastructure::oauth::OauthService;
use crate::infrastructure::rate_limit::{client_identifier, RateLimitStatus, RateLimiter};
use crate::infrastructure::threat::ThreatDetector;

use super::rpc::{
    resource_listing, JsonRpcRequest, JsonRpcResponse, ResourceUri, INTERNAL_ERROR,
    INVALID_REQUEST, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND,
};

pub struct AppState {
    pub oauth: Arc<OauthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub threat: Arc<ThreatDetector>,
    pub datahub: Arc<DataHubClient>,
    pub engine: Arc<WorkflowEngine>,
    pub audit: AuditHandle,
    pub config: Arc<GatewayConfig>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_endpoint))
        .route("/oauth/introspect", post(oauth_introspect))
        .route("/oauth/revoke", post(oauth_revoke))
        .route("/health", get(health))
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route("/test/rate-limit", get(rate_limit_test))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            security_middleware,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn request_client_id(headers: &HeaderMap) -> String {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    client_identifier(
        header_str("x-forwarded-for").as_deref(),
        header_str("x-real-ip").as_deref(),
        None,
        header_str("user-agent").as_deref(),
    )
}

fn apply_rate_headers(response: &mut Response, status: &RateLimitStatus) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&status.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&status.reset_at.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
    if let Some(retry_after) = status.retry_after {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert(header::RETRY_AFTER, value);
        }
    }
}

/// Rate limiting plus request-metadata threat screening. Body content for
/// the conversational path is screened by the workflow's security node.
async fn security_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let client_id = request_client_id(request.headers());

    let status = state.rate_limiter.check(&client_id, &path);
    if !status.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "response_type": "RATE_LIMIT_EXCEEDED",
                "message": format!(
                    "Rate limit exceeded. Try again in {} seconds.",
                    status.retry_after.unwrap_or(60)
                ),
            })),
        )
            .into_response();
        apply_rate_headers(&mut response, &status);
        return response;
    }

    // Screen request metadata: path, query string, and header content.
    let mut screened = vec![path.clone()];
    if let Some(query) = request.uri().query() {
        screened.push(query.to_string());
    }
    for name in ["user-agent", "referer"] {
        if let Some(value) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
            screened.push(value.to_string());
        }
    }
    for (name, value) in request.headers() {
        let name = name.as_str();
        if name.starts_with("x-") && name != "x-forwarded-for" {
            if let Ok(value) = value.to_str() {
                screened.push(value.to_string());
            }
        }
    }
    let detection = state.threat.analyze(&screened.join(" "), Some(&client_id));
    if detection.should_block() {
        state.audit.emit(
            AuditEvent::new(AuditEventType::JailbreakAttempt, AuditSeverity::Warning)
                .failure()
                .ip(&client_id)
                .endpoint(&path, request.method().as_str())
                .detail("matched_rules", json!(detection.matched_rules))
                .flag("request_metadata_threat"),
        );
        let mut response = (
            StatusCode::FORBIDDEN,
            Json(json!({
                "response_type": "SECURITY_BLOCKED",
                "message": "This request was blocked by the security policy.",
            })),
        )
            .into_response();
        apply_rate_headers(&mut response, &status);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_headers(&mut response, &status);
    response
}

// ============================================================================
// MCP JSON-RPC endpoint
// ============================================================================

fn rpc_error_response(
    http_status: StatusCode,
    id: Value,
    code: i32,
    message: &str,
    www_authenticate: bool,
) -> Response {
    let mut response =
        (http_status, Json(JsonRpcResponse::err(id, code, message))).into_response();
    if www_authenticate {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

async fn mcp_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if authorization.is_none() {
        return rpc_error_response(
            StatusCode::UNAUTHORIZED,
            Value::Null,
            INVALID_REQUEST,
            "Bearer token required for MCP access",
            true,
        );
    }

    let principal = match state.oauth.validate_bearer(authorization).await {
        Ok(principal) => principal,
        Err(GatewayError::AuthMissing) => {
            return rpc_error_response(
                StatusCode::UNAUTHORIZED,
                Value::Null,
                INVALID_REQUEST,
                "Bearer token required for MCP access",
                true,
            );
        }
        Err(_) => {
            return rpc_error_response(
                StatusCode::UNAUTHORIZED,
                Value::Null,
                INVALID_REQUEST,
                "Invalid or expired Bearer token",
                true,
            );
        }
    };

    if !principal.allows(Permission::McpRead) {
        return rpc_error_response(
            StatusCode::FORBIDDEN,
            Value::Null,
            INVALID_REQUEST,
            &format!(
                "Access denied for user {}. Contact administrator for data access.",
                principal.subject
            ),
            false,
        );
    }

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(_) => {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                Value::Null,
                INVALID_REQUEST,
                "Request body is not a JSON-RPC 2.0 envelope",
                false,
            );
        }
    };
    let id = request.id.clone();

    let bearer = authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();

    let result = match request.method.as_str() {
        "resources/list" => Ok(resource_listing()),
        "resources/read" => read_resource(&state, &request).await,
        "tools/call" => call_tool(&state, &request, &principal, &bearer).await,
        other => Err(JsonRpcResponse::err(
            id.clone(),
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    };

    match result {
        Ok(value) => Json(JsonRpcResponse::ok(id, value)).into_response(),
        Err(error) => Json(error).into_response(),
    }
}

async fn read_resource(
    state: &Arc<AppState>,
    request: &JsonRpcRequest,
) -> Result<Value, JsonRpcResponse> {
    let id = request.id.clone();
    let uri = request.param_str("uri").unwrap_or_default();
    let Some(resource) = ResourceUri::parse(uri) else {
        return Err(JsonRpcResponse::err(
            id,
            METHOD_NOT_FOUND,
            format!("Resource not found: {uri}"),
        ));
    };

    match resource {
        ResourceUri::AllModels | ResourceUri::PublishedModels | ResourceUri::DraftModels => {
            let models = state
                .datahub
                .get_all_models()
                .await
                .map_err(|e| internal_error(id.clone(), &e))?;
            let (published, draft): (Vec<_>, Vec<_>) =
                models.into_iter().partition(|m| m.is_published());
            let data = match resource {
                ResourceUri::PublishedModels => json!({ "published": published }),
                ResourceUri::DraftModels => json!({ "draft": draft }),
                _ => json!({ "published": published, "draft": draft }),
            };
            Ok(json!({
                "status": "success",
                "mcp_version": MCP_PROTOCOL_VERSION,
                "data": data,
            }))
        }
        ResourceUri::Model(model_id) => {
            let model = state
                .datahub
                .get_model_by_id(&model_id)
                .await
                .map_err(|e| internal_error(id.clone(), &e))?;
            Ok(json!({
                "status": "success",
                "mcp_version": MCP_PROTOCOL_VERSION,
                "model": model,
            }))
        }
        ResourceUri::ConnectionTest => {
            let result = state.datahub.test_connection().await;
            Ok(json!({
                "status": "connection_test",
                "mcp_version": MCP_PROTOCOL_VERSION,
                "connection_result": result,
            }))
        }
    }
}

fn internal_error(id: Value, err: &GatewayError) -> JsonRpcResponse {
    JsonRpcResponse::err(id, INTERNAL_ERROR, format!("Internal error: {err}"))
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct QueryRecordsArgs {
    model_id: Option<String>,
    universe_id: Option<String>,
    repository_id: Option<String>,
    fields: Vec<String>,
    filters: Vec<RecordFilter>,
    limit: Option<u32>,
    offset_token: Option<String>,
}

async fn call_tool(
    state: &Arc<AppState>,
    request: &JsonRpcRequest,
    principal: &Principal,
    bearer: &str,
) -> Result<Value, JsonRpcResponse> {
    let id = request.id.clone();
    let name = request
        .params
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = request
        .params
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));

    match name {
        "search_models_by_name" => {
            let pattern = arguments
                .get("name_pattern")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            let models = state
                .datahub
                .get_all_models()
                .await
                .map_err(|e| internal_error(id.clone(), &e))?;
            let matches: Vec<_> = models
                .into_iter()
                .filter(|m| m.name.to_lowercase().contains(&pattern))
                .collect();
            Ok(json!({
                "status": "success",
                "pattern": pattern,
                "match_count": matches.len(),
                "models": matches,
            }))
        }
        "get_model_statistics" => {
            let models = state
                .datahub
                .get_all_models()
                .await
                .map_err(|e| internal_error(id.clone(), &e))?;
            let published = models.iter().filter(|m| m.is_published()).count();
            let mut per_model = Vec::with_capacity(models.len());
            let mut total_fields = 0usize;
            for model in &models {
                let detailed = state
                    .datahub
                    .get_model_by_id(&model.id)
                    .await
                    .map_err(|e| internal_error(id.clone(), &e))?;
                total_fields += detailed.fields.len();
                per_model.push(json!({
                    "name": detailed.name,
                    "id": detailed.id,
                    "field_count": detailed.fields.len(),
                    "published": model.is_published(),
                }));
            }
            Ok(json!({
                "status": "success",
                "statistics": {
                    "total_models": per_model.len(),
                    "published_models": published,
                    "draft_models": per_model.len() - published,
                    "total_fields": total_fields,
                    "models": per_model,
                },
            }))
        }
        "get_model_fields" => {
            let model_id = arguments
                .get("model_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let model = state
                .datahub
                .get_model_by_id(model_id)
                .await
                .map_err(|e| internal_error(id.clone(), &e))?;
            Ok(json!({
                "status": "success",
                "model_id": model.id,
                "model_name": model.name,
                "field_count": model.fields.len(),
                "fields": model.fields,
            }))
        }
        "query_records" => query_records_tool(state, id, arguments, principal).await,
        "ask" => {
            let query = arguments
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if query.is_empty() {
                return Err(JsonRpcResponse::err(
                    id,
                    INVALID_REQUEST,
                    "Tool 'ask' requires a 'query' argument",
                ));
            }
            let mut request_state = RequestState::new(query, bearer);
            request_state.conversation_id = arguments
                .get("conversation_id")
                .and_then(Value::as_str)
                .map(str::to_string);

            // The workflow runs on its own task holding the cancellation
            // token; this handler holds the drop guard. When the client
            // disconnects, axum drops the handler future, the guard fires,
            // and in-flight hub/LLM/introspection calls abort while the
            // workflow still gets to record its final state.
            let cancel = CancellationToken::new();
            let _disconnect_guard = cancel.clone().drop_guard();
            let engine = Arc::clone(&state.engine);
            let final_state = tokio::spawn(async move { engine.run(request_state, cancel).await })
                .await
                .map_err(|e| {
                    internal_error(id.clone(), &GatewayError::Internal(e.to_string()))
                })?;
            let response = final_state.formatted_response.unwrap_or_else(|| {
                crate::domain::errors::ResponseEnvelope::new("INTERNAL", "No response produced.")
            });
            Ok(json!({
                "status": "success",
                "request_id": final_state.request_id.to_string(),
                "security_clearance": final_state.security_clearance,
                "response": response,
                "insights": final_state.proactive_insights,
                "follow_up_suggestions": final_state.follow_up_suggestions,
            }))
        }
        "get_security_status" => {
            if !principal.allows(Permission::McpAdmin) {
                return Err(JsonRpcResponse::err(
                    id,
                    INVALID_REQUEST,
                    "Tool 'get_security_status' requires mcp:admin",
                ));
            }
            Ok(json!({
                "status": "success",
                "rate_limiting": state.rate_limiter.stats(),
                "threat_detection": state.threat.stats(),
                "revoked_tokens": state.oauth.revocations().len(),
                "audit_events_dropped": state.audit.dropped_events(),
            }))
        }
        "get_audit_events" => {
            if !principal.allows(Permission::McpAdmin) {
                return Err(JsonRpcResponse::err(
                    id,
                    INVALID_REQUEST,
                    "Tool 'get_audit_events' requires mcp:admin",
                ));
            }
            let query = crate::infrastructure::audit::AuditQuery {
                event_type: arguments
                    .get("event_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                user_id: arguments
                    .get("user_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                severity: arguments
                    .get("severity")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                since: None,
            };
            let limit = arguments
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(100) as usize;
            let directory = state.config.audit.directory.clone();
            let events = tokio::task::spawn_blocking(move || {
                crate::infrastructure::audit::query_logs(&directory, &query, limit)
            })
            .await
            .map_err(|e| internal_error(id.clone(), &GatewayError::Internal(e.to_string())))?
            .unwrap_or_default();
            Ok(json!({
                "status": "success",
                "event_count": events.len(),
                "events": events,
            }))
        }
        other => Err(JsonRpcResponse::err(
            id,
            METHOD_NOT_FOUND,
            format!("Tool not found: {other}"),
        )),
    }
}

async fn query_records_tool(
    state: &Arc<AppState>,
    id: Value,
    arguments: Value,
    principal: &Principal,
) -> Result<Value, JsonRpcResponse> {
    let args: QueryRecordsArgs = serde_json::from_value(arguments).map_err(|e| {
        JsonRpcResponse::err(
            id.clone(),
            INVALID_REQUEST,
            format!("Invalid query_records arguments: {e}"),
        )
    })?;

    let model_id = args
        .model_id
        .or(args.universe_id)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            JsonRpcResponse::err(
                id.clone(),
                INVALID_REQUEST,
                "query_records requires model_id or universe_id",
            )
        })?;

    // Data-access enforcement happens against the canonical model name.
    let model = state
        .datahub
        .get_model_by_id(&model_id)
        .await
        .map_err(|e| internal_error(id.clone(), &e))?;
    if !principal.can_access_model(&model.name) {
        return Err(JsonRpcResponse::err(
            id,
            INVALID_REQUEST,
            format!(
                "Access denied: no data access for model {}",
                model.name
            ),
        ));
    }

    let repository_id = args
        .repository_id
        .or_else(|| state.datahub.repository_id().map(str::to_string))
        .unwrap_or_default();

    let params = RecordQueryParams {
        universe_id: model_id.clone(),
        repository_id,
        fields: args.fields,
        filters: args.filters,
        limit: args.limit.unwrap_or(100),
        offset_token: args.offset_token.unwrap_or_default(),
    };

    match state.datahub.query_records(params).await {
        Ok(set) => Ok(json!({
            "status": "success",
            "data": {
                "records": set.records,
            },
            "metadata": {
                "records_returned": set.total_returned,
                "total_count": set.total_count,
                "has_more": set.has_more,
                "next_offset_token": set.next_offset_token,
                "model_id": model_id,
            },
        })),
        Err(GatewayError::MdhUnauthorized) => Ok(json!({
            "status": "error",
            "error": "Authentication failed for DataHub record queries",
            "status_code": 401,
            "troubleshooting": unauthorized_troubleshooting(&model_id, false),
        })),
        Err(e) => Err(internal_error(id, &e)),
    }
}

// ============================================================================
// OAuth endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
struct IntrospectForm {
    token: String,
}

async fn oauth_introspect(
    State(state): State<Arc<AppState>>,
    Form(form): Form<IntrospectForm>,
) -> Response {
    let response = state.oauth.introspect(&form.token).await;
    Json(response).into_response()
}

#[derive(Debug, Deserialize)]
struct RevokeForm {
    token: String,
    #[serde(default)]
    token_type_hint: Option<String>,
}

fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn oauth_revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<RevokeForm>,
) -> Response {
    let Some((client_id, client_secret)) = parse_basic_auth(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    };
    if state.oauth.verify_client(&client_id, &client_secret).is_err() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }

    if let Some(hint) = form.token_type_hint.as_deref() {
        if hint != "access_token" && hint != "refresh_token" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "unsupported_token_type"})),
            )
                .into_response();
        }
    }

    // RFC 7009: revocation reports success even for unknown or already
    // revoked tokens.
    let _ = state
        .oauth
        .revoke_token(&form.token, form.token_type_hint.as_deref(), &client_id);
    Json(json!({"revoked": true})).into_response()
}

// ============================================================================
// Unauthenticated surfaces
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "mcp_version": MCP_PROTOCOL_VERSION,
        "audit_events_dropped": state.audit.dropped_events(),
    }))
    .into_response()
}

async fn protected_resource_metadata(State(state): State<Arc<AppState>>) -> Response {
    let issuer = state.config.oauth.issuer.clone();
    Json(json!({
        "resource": state.config.oauth.audience,
        "authorization_servers": [issuer],
        "scopes_supported": ["mcp:read", "mcp:execute", "mcp:admin"],
        "bearer_methods_supported": ["header"],
        "introspection_endpoint": "/oauth/introspect",
        "revocation_endpoint": "/oauth/revoke",
        "mcp_compliance": MCP_PROTOCOL_VERSION,
    }))
    .into_response()
}

/// Exists so operators can verify rate limiting works even from
/// whitelisted hosts; the limiter treats this endpoint as bypass-aware.
async fn rate_limit_test() -> Response {
    Json(json!({
        "status": "ok",
        "note": "this endpoint bypasses the client whitelist for rate-limit verification",
    }))
    .into_response()
}
