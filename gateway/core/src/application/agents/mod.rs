// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pipeline stage agents.
//!
//! Each stage is a pure transformation over its inputs plus access to the
//! hub adapter for catalog lookups. Stages that can use an LLM always carry
//! a rule-based fallback; the pipeline never fails because no model is
//! configured.

mod data_retrieval;
mod field_mapper;
mod model_discovery;
mod query_analyzer;
mod query_builder;
mod response_generator;

pub use data_retrieval::DataRetrieval;
pub use field_mapper::FieldMapper;
pub use model_discovery::{ModelDiscovery, RankedModel};
pub use query_analyzer::QueryAnalyzer;
pub use query_builder::QueryBuilder;
pub use response_generator::{GeneratedResponse, ResponseGenerator};

/// Pull a JSON value out of an LLM reply: either a bare object/array or
/// one wrapped in a ```json fence.
pub(crate) fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    let body = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest)
    } else {
        trimmed
    };
    let body = body.trim();
    let start = body.find(['{', '['])?;
    serde_json::from_str(&body[start..]).ok()
}
