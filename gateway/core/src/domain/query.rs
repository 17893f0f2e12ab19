// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Canonical query value objects.
//!
//! The canonical query is the implementation-neutral object built by the
//! query-builder stage before adapter-specific serialization. The remote
//! hub only supports record selection, so every intent maps to a single
//! `select` operation; COUNT is implemented client-side.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::state::QueryIntent;

/// Entity extracted from the user's question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Structural complexity of the analyzed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryComplexity {
    Simple,
    Complex,
}

/// Output contract of the query-analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: QueryIntent,
    pub entities: Vec<Entity>,
    pub query_type: QueryComplexity,
    #[serde(default)]
    pub suggested_models: Vec<String>,
    #[serde(default)]
    pub is_meta_query: bool,
    pub original_query: String,
}

/// Filter operator in the hub's wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    In,
    Between,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::Contains => "CONTAINS",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::In => "IN",
            Self::Between => "BETWEEN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grouping {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Single mapping from an entity to a model field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    /// Canonical upper-cased field identifier.
    pub field_name: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Validation outcome for a set of field mappings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingValidation {
    pub is_valid: bool,
    pub low_confidence_mappings: Vec<String>,
    pub warnings: Vec<String>,
}

/// The canonical, adapter-neutral query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalQuery {
    pub query_type: QueryIntent,
    pub model_id: String,
    /// Always a single-element `["select"]`; the hub has no other verb.
    pub operations: Vec<String>,
    pub filters: Vec<QueryFilter>,
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub hints: serde_json::Map<String, Value>,
}

impl CanonicalQuery {
    /// Deterministic fingerprint used as the result-cache key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model_id.as_bytes());
        hasher.update(self.query_type.as_str().as_bytes());
        for field in &self.fields {
            hasher.update(field.as_bytes());
        }
        for filter in &self.filters {
            hasher.update(filter.field.as_bytes());
            hasher.update(filter.operator.as_str().as_bytes());
            hasher.update(filter.value.as_bytes());
        }
        if let Some(grouping) = &self.grouping {
            hasher.update(grouping.field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Generic count-nouns describe *what to count*, never filter criteria.
pub const GENERIC_COUNT_TERMS: &[&str] = &[
    "products",
    "product",
    "items",
    "records",
    "entries",
    "users",
    "user",
    "customers",
    "campaigns",
    "advertisements",
    "ads",
    "user names",
    "usernames",
    "names",
    "opportunities",
    "engagements",
];

pub fn is_generic_count_term(entity_text: &str) -> bool {
    let lowered = entity_text.to_lowercase();
    GENERIC_COUNT_TERMS.contains(&lowered.as_str())
}
