// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Query building: analysis + field mapping into a canonical query.
//!
//! The hub only supports record selection, so every intent becomes a single
//! `select`; COUNT is counted client-side over the selected records and
//! selects exactly one concrete field, never a wildcard.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::errors::GatewayError;
use crate::domain::model::ModelDescriptor;
use crate::domain::query::{
    is_generic_count_term, CanonicalQuery, FieldMapping, FilterOperator, Grouping, QueryAnalysis,
    QueryFilter,
};
use crate::domain::state::QueryIntent;

use super::field_mapper::CONFIDENCE_THRESHOLD;

const LIST_FIELD_CAP: usize = 4;

#[derive(Debug, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        analysis: &QueryAnalysis,
        mapping: &HashMap<String, FieldMapping>,
        model: &ModelDescriptor,
    ) -> Result<CanonicalQuery, GatewayError> {
        if model.id.is_empty() {
            return Err(GatewayError::QueryBuildInvalid("model id is empty".into()));
        }

        let filters = self.build_filters(mapping);
        let grouping = if analysis.intent == QueryIntent::Compare {
            self.build_grouping(mapping)
        } else {
            None
        };
        let fields = self.determine_fields(analysis.intent, mapping, &grouping, model)?;

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "original_query".into(),
            Value::String(analysis.original_query.clone()),
        );
        metadata.insert(
            "entity_count".into(),
            Value::from(analysis.entities.len()),
        );

        let mut hints = serde_json::Map::new();
        if analysis.intent == QueryIntent::Count {
            hints.insert("count_client_side".into(), Value::Bool(true));
        }
        if !filters.is_empty() {
            hints.insert("filtered".into(), Value::Bool(true));
        }

        let query = CanonicalQuery {
            query_type: analysis.intent,
            model_id: model.id.clone(),
            operations: vec!["select".into()],
            filters,
            fields,
            grouping,
            metadata,
            hints,
        };
        self.validate(&query)?;
        Ok(self.optimize(query))
    }

    /// Filters come only from high-confidence mappings, never from generic
    /// count-nouns.
    fn build_filters(&self, mapping: &HashMap<String, FieldMapping>) -> Vec<QueryFilter> {
        let mut filters: Vec<QueryFilter> = mapping
            .iter()
            .filter(|(entity, m)| {
                m.confidence >= CONFIDENCE_THRESHOLD
                    && !m.field_name.is_empty()
                    && !is_generic_count_term(entity)
            })
            .map(|(entity, m)| QueryFilter {
                field: m.field_name.clone(),
                operator: self.operator_for(&m.field_name),
                value: entity.clone(),
                confidence: m.confidence,
            })
            .collect();
        filters.sort_by(|a, b| a.field.cmp(&b.field).then(a.value.cmp(&b.value)));
        filters
    }

    /// Names and brands match exactly; product-like fields match loosely.
    fn operator_for(&self, field_name: &str) -> FilterOperator {
        let lowered = field_name.to_lowercase();
        if lowered.contains("date") || lowered.contains("quarter") {
            FilterOperator::Equals
        } else if lowered.contains("brand") || lowered.contains("name") {
            FilterOperator::Equals
        } else if lowered.contains("product") {
            FilterOperator::Contains
        } else {
            FilterOperator::Equals
        }
    }

    /// COMPARE groups by the first high-confidence brand-like field, else
    /// the first high-confidence field.
    fn build_grouping(&self, mapping: &HashMap<String, FieldMapping>) -> Option<Grouping> {
        let mut confident: Vec<&FieldMapping> = mapping
            .values()
            .filter(|m| m.confidence >= 0.8 && !m.field_name.is_empty())
            .collect();
        confident.sort_by(|a, b| a.field_name.cmp(&b.field_name));

        let brand_like = confident.iter().find(|m| {
            let lowered = m.field_name.to_lowercase();
            lowered.contains("brand") || lowered.contains("advertiser")
        });
        brand_like
            .or(confident.first())
            .map(|m| Grouping {
                field: m.field_name.clone(),
                kind: "group_by".into(),
            })
    }

    fn determine_fields(
        &self,
        intent: QueryIntent,
        mapping: &HashMap<String, FieldMapping>,
        grouping: &Option<Grouping>,
        model: &ModelDescriptor,
    ) -> Result<Vec<String>, GatewayError> {
        let mut mapped: Vec<String> = mapping
            .values()
            .filter(|m| m.confidence >= CONFIDENCE_THRESHOLD)
            .map(|m| m.field_name.clone())
            .collect();
        mapped.sort();
        mapped.dedup();

        let fields = match intent {
            QueryIntent::Count => {
                // Exactly one concrete field; counting needs no more.
                let field = mapped
                    .into_iter()
                    .next()
                    .or_else(|| model.fields.first().map(|f| f.name.clone()))
                    .ok_or_else(|| {
                        GatewayError::QueryBuildInvalid("model has no fields to count".into())
                    })?;
                vec![field]
            }
            _ => {
                let mut fields = mapped;
                if let Some(grouping) = grouping {
                    if !fields.contains(&grouping.field) {
                        fields.insert(0, grouping.field.clone());
                    }
                }
                for title_field in &model.record_title_fields {
                    if fields.len() >= LIST_FIELD_CAP {
                        break;
                    }
                    if model.has_field(title_field) && !fields.contains(title_field) {
                        fields.push(title_field.clone());
                    }
                }
                for field in &model.fields {
                    if fields.len() >= LIST_FIELD_CAP {
                        break;
                    }
                    if !fields.contains(&field.name) {
                        fields.push(field.name.clone());
                    }
                }
                if fields.is_empty() {
                    return Err(GatewayError::QueryBuildInvalid(
                        "no fields available for selection".into(),
                    ));
                }
                fields
            }
        };
        Ok(fields)
    }

    /// Invariants every constructed query must satisfy.
    pub fn validate(&self, query: &CanonicalQuery) -> Result<(), GatewayError> {
        if query.operations != vec!["select".to_string()] {
            return Err(GatewayError::QueryBuildInvalid(
                "only a single select operation is supported".into(),
            ));
        }
        if query.fields.is_empty() {
            return Err(GatewayError::QueryBuildInvalid("no fields selected".into()));
        }
        if query.fields.iter().any(|f| f == "*") {
            return Err(GatewayError::QueryBuildInvalid(
                "wildcard field selection is not supported".into(),
            ));
        }
        if query.query_type == QueryIntent::Count && query.fields.len() != 1 {
            return Err(GatewayError::QueryBuildInvalid(
                "count queries select exactly one field".into(),
            ));
        }
        Ok(())
    }

    /// Deduplicate filters on (field, operator, value).
    fn optimize(&self, mut query: CanonicalQuery) -> CanonicalQuery {
        query
            .filters
            .dedup_by(|a, b| a.field == b.field && a.operator == b.operator && a.value == b.value);
        query
    }
}
