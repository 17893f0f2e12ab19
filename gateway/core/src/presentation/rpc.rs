// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! JSON-RPC 2.0 envelope types for the MCP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// The resource URIs this gateway serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    AllModels,
    PublishedModels,
    DraftModels,
    Model(String),
    ConnectionTest,
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Option<Self> {
        match uri {
            "datahub://models/all" => Some(Self::AllModels),
            "datahub://models/published" => Some(Self::PublishedModels),
            "datahub://models/draft" => Some(Self::DraftModels),
            "datahub://connection/test" => Some(Self::ConnectionTest),
            other => other
                .strip_prefix("datahub://model/")
                .filter(|id| !id.is_empty())
                .map(|id| Self::Model(id.to_string())),
        }
    }
}

/// Descriptors returned by `resources/list`.
pub fn resource_listing() -> Value {
    serde_json::json!({
        "resources": [
            {"uri": "datahub://models/all", "name": "All models", "description": "All data models (published and draft)"},
            {"uri": "datahub://models/published", "name": "Published models", "description": "Published data models only"},
            {"uri": "datahub://models/draft", "name": "Draft models", "description": "Draft data models only"},
            {"uri": "datahub://model/{id}", "name": "Model details", "description": "One model with its full field list"},
            {"uri": "datahub://connection/test", "name": "Connection test", "description": "Hub connection health"},
        ],
        "tools": [
            {"name": "search_models_by_name", "arguments": ["name_pattern"]},
            {"name": "get_model_statistics", "arguments": []},
            {"name": "get_model_fields", "arguments": ["model_id"]},
            {"name": "query_records", "arguments": ["model_id", "repository_id", "fields", "filters", "limit", "offset_token"]},
            {"name": "ask", "arguments": ["query", "conversation_id"]},
            {"name": "get_security_status", "arguments": []},
            {"name": "get_audit_events", "arguments": ["event_type", "user_id", "severity", "limit"]},
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_uri_parsing() {
        assert_eq!(
            ResourceUri::parse("datahub://models/all"),
            Some(ResourceUri::AllModels)
        );
        assert_eq!(
            ResourceUri::parse("datahub://connection/test"),
            Some(ResourceUri::ConnectionTest)
        );
        assert_eq!(
            ResourceUri::parse("datahub://model/u-1"),
            Some(ResourceUri::Model("u-1".into()))
        );
        assert_eq!(ResourceUri::parse("datahub://model/"), None);
        assert_eq!(ResourceUri::parse("boomi://nothing"), None);
    }

    #[test]
    fn test_response_serialization_excludes_absent_half() {
        let ok = serde_json::to_value(JsonRpcResponse::ok(Value::from(1), Value::Null)).unwrap();
        assert!(ok.get("error").is_none());
        let err = serde_json::to_value(JsonRpcResponse::err(
            Value::from(1),
            METHOD_NOT_FOUND,
            "Method not found: nope",
        ))
        .unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["code"], METHOD_NOT_FOUND);
    }

    #[test]
    fn test_request_parses_minimal_body() {
        let request: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"datahub://models/all"}}"#,
        )
        .unwrap();
        assert_eq!(request.method, "resources/read");
        assert_eq!(request.param_str("uri"), Some("datahub://models/all"));
    }
}
