// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Query analysis: intent classification and entity extraction.
//!
//! The LLM path asks for a structured JSON classification; when no model is
//! configured or the call fails, a pattern fallback extracts verbs and
//! domain nouns. Unknown inputs yield intent UNKNOWN, which ends the
//! pipeline before any remote call.

use std::sync::Arc;

use crate::domain::llm::{GenerationOptions, LlmProvider};
use crate::domain::model::ModelDescriptor;
use crate::domain::query::{is_generic_count_term, Entity, QueryAnalysis, QueryComplexity};
use crate::domain::state::QueryIntent;

use super::extract_json;

const META_PHRASES: &[&str] = &[
    "list models",
    "list the models",
    "what models",
    "which models",
    "available models",
    "data models",
    "show models",
    "what data do",
];

const FIELD_PHRASES: &[&str] = &["what fields", "which fields", "fields does", "fields in"];

pub struct QueryAnalyzer {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl QueryAnalyzer {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    pub async fn analyze(
        &self,
        user_query: &str,
        models: &[ModelDescriptor],
    ) -> QueryAnalysis {
        if let Some(llm) = &self.llm {
            let model_names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            let prompt = format!(
                r#"Classify this data-access question.

QUESTION: "{user_query}"
AVAILABLE MODELS: {model_names:?}

Respond with a JSON object only:
{{
  "intent": "COUNT" | "LIST" | "COMPARE" | "ANALYZE" | "META" | "UNKNOWN",
  "entities": [{{"text": "...", "type": "BRAND|OBJECT|PERSON|TIME"}}],
  "query_type": "SIMPLE" | "COMPLEX",
  "suggested_models": ["..."],
  "is_meta_query": true/false
}}

Intent META means the question is about the catalog itself (which models or
fields exist), not about record data."#
            );
            if let Ok(response) = llm.generate(&prompt, &GenerationOptions::default()).await {
                if let Some(value) = extract_json(&response.text) {
                    if let Ok(mut analysis) = serde_json::from_value::<QueryAnalysis>(
                        patch_original_query(value, user_query),
                    ) {
                        if analysis.intent == QueryIntent::Meta {
                            analysis.is_meta_query = true;
                        }
                        return analysis;
                    }
                }
            }
            tracing::debug!("query analysis falling back to pattern extraction");
        }
        self.analyze_with_patterns(user_query, models)
    }

    /// Verb and noun pattern fallback.
    fn analyze_with_patterns(&self, user_query: &str, models: &[ModelDescriptor]) -> QueryAnalysis {
        let lowered = user_query.to_lowercase();

        let is_meta = META_PHRASES.iter().any(|p| lowered.contains(p))
            || FIELD_PHRASES.iter().any(|p| lowered.contains(p));

        let intent = if is_meta {
            QueryIntent::Meta
        } else if lowered.contains("how many") || lowered.contains("count") {
            QueryIntent::Count
        } else if lowered.contains("compare")
            || lowered.contains(" versus ")
            || lowered.contains(" vs ")
            || lowered.contains("difference between")
        {
            QueryIntent::Compare
        } else if lowered.contains("analyze")
            || lowered.contains("analysis")
            || lowered.contains("trend")
        {
            QueryIntent::Analyze
        } else if lowered.contains("list")
            || lowered.contains("show")
            || lowered.contains("which")
            || lowered.contains("what")
            || lowered.contains("display")
            || lowered.contains("get ")
        {
            QueryIntent::List
        } else {
            QueryIntent::Unknown
        };

        let mut entities: Vec<Entity> = Vec::new();
        let mut suggested_models: Vec<String> = Vec::new();

        for model in models {
            let name = model.name.to_lowercase();
            let singular = name.trim_end_matches('s');
            if lowered.contains(&name) || (!singular.is_empty() && lowered.contains(singular)) {
                suggested_models.push(model.name.clone());
                push_entity(&mut entities, &model.name, "OBJECT");
            }
        }

        // Generic count-nouns name what is being counted or listed.
        for term in crate::domain::query::GENERIC_COUNT_TERMS {
            if lowered.contains(term) {
                push_entity(&mut entities, term, "OBJECT");
            }
        }

        // Capitalized tokens past the first word read as proper names.
        let words: Vec<&str> = user_query.split_whitespace().collect();
        for word in words.iter().skip(1) {
            let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
            if cleaned.len() > 1
                && cleaned.chars().next().is_some_and(|c| c.is_uppercase())
                && !is_generic_count_term(cleaned)
            {
                push_entity(&mut entities, cleaned, "BRAND");
            }
        }

        // Quoted phrases are explicit values.
        for segment in user_query.split('"').skip(1).step_by(2) {
            if !segment.trim().is_empty() {
                push_entity(&mut entities, segment.trim(), "VALUE");
            }
        }

        let query_type = if entities.len() > 2 || lowered.contains(" and ") {
            QueryComplexity::Complex
        } else {
            QueryComplexity::Simple
        };

        QueryAnalysis {
            intent,
            entities,
            query_type,
            suggested_models,
            is_meta_query: is_meta,
            original_query: user_query.to_string(),
        }
    }
}

fn push_entity(entities: &mut Vec<Entity>, text: &str, entity_type: &str) {
    if !entities
        .iter()
        .any(|e| e.text.eq_ignore_ascii_case(text))
    {
        entities.push(Entity {
            text: text.to_string(),
            entity_type: entity_type.to_string(),
        });
    }
}

fn patch_original_query(mut value: serde_json::Value, user_query: &str) -> serde_json::Value {
    if let Some(map) = value.as_object_mut() {
        map.entry("original_query")
            .or_insert_with(|| serde_json::Value::String(user_query.to_string()));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::PublicationStatus;

    fn models() -> Vec<ModelDescriptor> {
        vec![ModelDescriptor {
            id: "u-1".into(),
            name: "Advertisements".into(),
            publication_status: PublicationStatus::Publish,
            latest_version: Some("1".into()),
            fields: vec![],
            sources: vec![],
            match_rule_count: 0,
            record_title_fields: vec![],
        }]
    }

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::new(None)
    }

    #[tokio::test]
    async fn test_count_intent() {
        let analysis = analyzer()
            .analyze("How many advertisements are there?", &models())
            .await;
        assert_eq!(analysis.intent, QueryIntent::Count);
        assert!(analysis
            .suggested_models
            .contains(&"Advertisements".to_string()));
    }

    #[tokio::test]
    async fn test_list_intent_with_brand_entity() {
        let analysis = analyzer()
            .analyze("Which products is Sony advertising?", &models())
            .await;
        assert_eq!(analysis.intent, QueryIntent::List);
        assert!(analysis
            .entities
            .iter()
            .any(|e| e.text == "Sony" && e.entity_type == "BRAND"));
        assert!(analysis.entities.iter().any(|e| e.text == "products"));
    }

    #[tokio::test]
    async fn test_meta_query_detection() {
        let analysis = analyzer().analyze("list models in the system", &models()).await;
        assert_eq!(analysis.intent, QueryIntent::Meta);
        assert!(analysis.is_meta_query);

        let fields = analyzer()
            .analyze("what fields does Advertisements have?", &models())
            .await;
        assert_eq!(fields.intent, QueryIntent::Meta);
    }

    #[tokio::test]
    async fn test_compare_intent() {
        let analysis = analyzer()
            .analyze("compare Sony vs Samsung campaigns", &models())
            .await;
        assert_eq!(analysis.intent, QueryIntent::Compare);
    }

    #[tokio::test]
    async fn test_unknown_intent_for_gibberish() {
        let analysis = analyzer().analyze("florble the gribbets", &models()).await;
        assert_eq!(analysis.intent, QueryIntent::Unknown);
    }

    #[tokio::test]
    async fn test_quoted_value_extraction() {
        let analysis = analyzer()
            .analyze(r#"list advertisements where advertiser is "Sony Electronics""#, &models())
            .await;
        assert!(analysis
            .entities
            .iter()
            .any(|e| e.text == "Sony Electronics" && e.entity_type == "VALUE"));
    }
}
