// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Field mapping: entities to canonical model fields.
//!
//! Generic count-nouns are never emitted as mappings; they describe what to
//! count, not filter criteria. Mappings below 0.7 confidence are flagged by
//! validation and excluded from filters downstream.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::llm::{GenerationOptions, LlmProvider};
use crate::domain::model::ModelDescriptor;
use crate::domain::query::{is_generic_count_term, Entity, FieldMapping, MappingValidation};

use super::extract_json;

pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Entity-noun to field-name synonym table for the pattern fallback.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("brand", &["BRAND", "ADVERTISER"]),
    ("company", &["COMPANY", "ADVERTISER"]),
    ("advertiser", &["ADVERTISER"]),
    ("product", &["PRODUCT", "PRODUCT_NAME"]),
    ("name", &["NAME", "USERNAME", "FIRSTNAME"]),
    ("price", &["PRICE", "COST", "AMOUNT"]),
    ("date", &["DATE", "CREATED_DATE", "START_DATE"]),
];

pub struct FieldMapper {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl FieldMapper {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Map entities onto one model's fields.
    pub async fn map_entities(
        &self,
        entities: &[Entity],
        model: &ModelDescriptor,
        user_query: &str,
    ) -> HashMap<String, FieldMapping> {
        let candidates: Vec<&Entity> = entities
            .iter()
            .filter(|e| !is_generic_count_term(&e.text))
            .collect();
        if candidates.is_empty() {
            return HashMap::new();
        }

        if let Some(llm) = &self.llm {
            if let Some(mapping) = self.map_with_llm(llm, &candidates, model, user_query).await {
                return mapping;
            }
            tracing::debug!("field mapping falling back to pattern matching");
        }
        self.map_with_patterns(&candidates, model)
    }

    async fn map_with_llm(
        &self,
        llm: &Arc<dyn LlmProvider>,
        entities: &[&Entity],
        model: &ModelDescriptor,
        user_query: &str,
    ) -> Option<HashMap<String, FieldMapping>> {
        let entity_list: Vec<String> = entities
            .iter()
            .map(|e| format!("{} ({})", e.text, e.entity_type))
            .collect();
        let field_list: Vec<&str> = model.fields.iter().map(|f| f.name.as_str()).collect();
        let prompt = format!(
            r#"Map query entities to data model fields.

QUERY: "{user_query}"
ENTITIES: {entity_list:?}
MODEL FIELDS: {field_list:?}

Respond with a JSON object mapping each entity text to:
{{"field_name": "FIELD", "confidence": 0.0-1.0, "reasoning": "..."}}

Only include mappings with confidence above 0.6. Entities that are filter
values (brands, names) map to the field they filter on."#
        );
        let response = llm
            .generate(&prompt, &GenerationOptions::default())
            .await
            .ok()?;
        let value = extract_json(&response.text)?;
        let raw: HashMap<String, FieldMapping> = serde_json::from_value(value).ok()?;

        // Discard hallucinated fields and canonicalize the rest.
        let mapping: HashMap<String, FieldMapping> = raw
            .into_iter()
            .filter(|(entity, m)| !is_generic_count_term(entity) && model.has_field(&m.field_name))
            .map(|(entity, mut m)| {
                m.field_name = m.field_name.to_uppercase();
                (entity, m)
            })
            .collect();
        (!mapping.is_empty()).then_some(mapping)
    }

    fn map_with_patterns(
        &self,
        entities: &[&Entity],
        model: &ModelDescriptor,
    ) -> HashMap<String, FieldMapping> {
        let mut mapping = HashMap::new();

        for entity in entities {
            let upper = entity.text.to_uppercase().replace(' ', "_");
            let mut best: Option<(String, f64, String)> = None;

            for field in &model.fields {
                let score = if field.name == upper {
                    Some((0.95, "exact field name match".to_string()))
                } else if field.name.trim_end_matches('S') == upper.trim_end_matches('S') {
                    Some((0.9, "singular/plural field name match".to_string()))
                } else if field.name.contains(&upper) || upper.contains(&field.name) {
                    Some((0.75, "partial field name match".to_string()))
                } else {
                    None
                };
                if let Some((score, reason)) = score {
                    if best.as_ref().map(|(_, s, _)| score > *s).unwrap_or(true) {
                        best = Some((field.name.clone(), score, reason));
                    }
                }
            }

            // Synonyms cover nouns that name a field indirectly.
            if best.is_none() {
                let lowered = entity.text.to_lowercase();
                for (noun, field_names) in SYNONYMS {
                    if lowered.contains(noun) {
                        if let Some(field) = field_names.iter().find(|f| model.has_field(f)) {
                            best = Some((
                                field.to_string(),
                                0.85,
                                format!("synonym of {noun}"),
                            ));
                            break;
                        }
                    }
                }
            }

            // A brand-typed entity is a filter value for the brand-like field.
            if best.is_none() && entity.entity_type == "BRAND" {
                if let Some(field) = model
                    .fields
                    .iter()
                    .find(|f| f.name.contains("ADVERTISER") || f.name.contains("BRAND"))
                {
                    best = Some((
                        field.name.clone(),
                        0.85,
                        "brand entity mapped to brand-like field".to_string(),
                    ));
                }
            }

            if let Some((field_name, confidence, reasoning)) = best {
                mapping.insert(
                    entity.text.clone(),
                    FieldMapping {
                        field_name,
                        confidence,
                        reasoning,
                    },
                );
            }
        }
        mapping
    }

    /// Flag low-confidence mappings.
    pub fn validate(&self, mapping: &HashMap<String, FieldMapping>) -> MappingValidation {
        let low: Vec<String> = mapping
            .iter()
            .filter(|(_, m)| m.confidence < CONFIDENCE_THRESHOLD)
            .map(|(entity, _)| entity.clone())
            .collect();
        let warnings = if low.is_empty() {
            Vec::new()
        } else {
            vec![format!("Low confidence mappings: {}", low.join(", "))]
        };
        MappingValidation {
            is_valid: low.is_empty(),
            low_confidence_mappings: low,
            warnings,
        }
    }
}
