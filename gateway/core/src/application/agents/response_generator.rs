// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Response generation: turn record sets into readable answers.
//!
//! COUNT answers state the number; LIST answers show the most meaningful
//! business field per record (never internal record IDs), capped at ten
//! items; COMPARE renders a small grouped table; large result sets become a
//! statistical summary. An LLM may phrase the answer when configured, with
//! the rule-based renderer as the always-available fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::llm::{GenerationOptions, LlmProvider};
use crate::domain::query::CanonicalQuery;
use crate::domain::state::QueryIntent;
use crate::infrastructure::datahub::RecordSet;

const DISPLAY_LIMIT: usize = 10;
const LARGE_DATASET_THRESHOLD: usize = 100;

/// The pipeline's final, user-facing answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub response_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_preview: Vec<Map<String, Value>>,
}

pub struct ResponseGenerator {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl ResponseGenerator {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    pub async fn generate(
        &self,
        user_query: &str,
        query: &CanonicalQuery,
        set: &RecordSet,
    ) -> GeneratedResponse {
        match query.query_type {
            QueryIntent::Count => self.count_response(user_query, set).await,
            QueryIntent::Compare => self.comparison_response(query, set),
            _ => self.list_response(user_query, set).await,
        }
    }

    async fn count_response(&self, user_query: &str, set: &RecordSet) -> GeneratedResponse {
        let count = if set.total_count > 0 {
            set.total_count
        } else {
            set.total_returned
        };
        let subject = extract_subject(user_query);

        if let Some(llm) = &self.llm {
            let prompt = format!(
                "Answer this question in one short sentence using the number.\n\
                 Question: {user_query}\nCount: {count}\n\
                 Return only the sentence."
            );
            if let Ok(response) = llm.generate(&prompt, &GenerationOptions::default()).await {
                let message = response.text.trim().to_string();
                if !message.is_empty() {
                    return GeneratedResponse {
                        response_type: "COUNT".into(),
                        message,
                        count: Some(count),
                        item_count: None,
                        data_preview: Vec::new(),
                    };
                }
            }
        }

        GeneratedResponse {
            response_type: "COUNT".into(),
            message: format!("I found {count} {subject}."),
            count: Some(count),
            item_count: None,
            data_preview: Vec::new(),
        }
    }

    async fn list_response(&self, user_query: &str, set: &RecordSet) -> GeneratedResponse {
        if set.records.is_empty() {
            return GeneratedResponse {
                response_type: "LIST".into(),
                message: "I didn't find any results matching your criteria.".into(),
                count: None,
                item_count: Some(0),
                data_preview: Vec::new(),
            };
        }

        if set.records.len() > LARGE_DATASET_THRESHOLD {
            return self.summary_response(set);
        }

        let record_count = set.records.len();
        let shown = record_count.min(DISPLAY_LIMIT);
        let mut lines = Vec::with_capacity(shown);
        for (i, record) in set.records.iter().take(DISPLAY_LIMIT).enumerate() {
            lines.push(format!("{}. {}", i + 1, display_value(record, i)));
        }

        let mut message = format!(
            "Here are the results I found ({record_count} total):\n\n{}",
            lines.join("\n")
        );
        if record_count > DISPLAY_LIMIT {
            message.push_str(&format!(
                "\n\n... and {} more items.",
                record_count - DISPLAY_LIMIT
            ));
        }

        // Optional phrasing pass; the rendered list is already complete.
        if let Some(llm) = &self.llm {
            let prompt = format!(
                "Rewrite this answer to the question \"{user_query}\" so it reads \
                 naturally. Keep every listed value, the total, and the numbering. \
                 Return only the rewritten answer.\n\n{message}"
            );
            if let Ok(response) = llm.generate(&prompt, &GenerationOptions::default()).await {
                let text = response.text.trim();
                if !text.is_empty() {
                    message = text.to_string();
                }
            }
        }

        GeneratedResponse {
            response_type: "LIST".into(),
            message,
            count: None,
            item_count: Some(record_count),
            data_preview: set.records.iter().take(5).cloned().collect(),
        }
    }

    fn comparison_response(&self, query: &CanonicalQuery, set: &RecordSet) -> GeneratedResponse {
        let group_field = query
            .grouping
            .as_ref()
            .map(|g| g.field.clone())
            .unwrap_or_else(|| {
                query
                    .fields
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "_record_id".to_string())
            });

        let mut groups: BTreeMap<String, usize> = BTreeMap::new();
        for record in &set.records {
            let key = record
                .get(&group_field)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .unwrap_or("(unknown)")
                .to_string();
            *groups.entry(key).or_insert(0) += 1;
        }

        let mut message = format!("Comparison by {group_field}:\n\n");
        message.push_str(&format!("{:<24} | Records\n", group_field.as_str()));
        message.push_str(&format!("{:-<24}-+--------\n", ""));
        for (key, count) in &groups {
            message.push_str(&format!("{key:<24} | {count}\n"));
        }

        GeneratedResponse {
            response_type: "COMPARE".into(),
            message,
            count: None,
            item_count: Some(set.records.len()),
            data_preview: set.records.iter().take(5).cloned().collect(),
        }
    }

    /// Summary with numeric min/max/avg and categorical unique counts.
    fn summary_response(&self, set: &RecordSet) -> GeneratedResponse {
        let record_count = set.records.len();
        let mut message = format!("I found {record_count} results for your query. Here's a summary:\n\n");

        let field_names: Vec<String> = set
            .records
            .first()
            .map(|r| r.keys().filter(|k| !k.starts_with('_')).cloned().collect())
            .unwrap_or_default();

        for field in field_names {
            let values: Vec<&str> = set
                .records
                .iter()
                .filter_map(|r| r.get(&field).and_then(Value::as_str))
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.parse().ok()).collect();
            if numbers.len() == values.len() {
                let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
                message.push_str(&format!(
                    "- {field}: min {min:.2}, max {max:.2}, avg {avg:.2}\n"
                ));
            } else {
                let unique: std::collections::BTreeSet<&str> = values.iter().copied().collect();
                message.push_str(&format!("- {field}: {} unique values\n", unique.len()));
            }
        }

        GeneratedResponse {
            response_type: "SUMMARY".into(),
            message,
            count: Some(record_count),
            item_count: Some(record_count),
            data_preview: set.records.iter().take(5).cloned().collect(),
        }
    }
}

/// Pick the most meaningful business value for one record. Combined
/// advertiser/product and person-name renderings come first; internal
/// identifiers are never shown.
fn display_value(record: &Map<String, Value>, index: usize) -> String {
    let get = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    };

    if let (Some(advertiser), Some(product)) = (get("ADVERTISER"), get("PRODUCT")) {
        return format!("{advertiser} - {product}");
    }
    if let (Some(first), Some(last)) = (get("FIRSTNAME"), get("LASTNAME")) {
        return format!("{first} {last}");
    }

    for preferred in ["NAME", "PRODUCT", "ADVERTISER", "USERNAME", "TITLE"] {
        if let Some(value) = get(preferred) {
            return value.to_string();
        }
    }

    // First non-internal, non-identifier field wins.
    for (key, value) in record {
        if key.starts_with('_') || key.ends_with("_ID") || key == "ID" {
            continue;
        }
        if let Some(text) = value.as_str() {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    format!("record {}", index + 1)
}

/// The thing being counted, lifted from the question's wording.
fn extract_subject(user_query: &str) -> String {
    let lowered = user_query.to_lowercase();
    for term in crate::domain::query::GENERIC_COUNT_TERMS {
        if lowered.contains(term) && term.ends_with('s') {
            return term.to_string();
        }
    }
    "results".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::query::Grouping;

    fn record(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn set(records: Vec<Map<String, Value>>) -> RecordSet {
        let total = records.len();
        RecordSet {
            records,
            total_returned: total,
            total_count: total,
            has_more: false,
            next_offset_token: String::new(),
        }
    }

    fn count_query() -> CanonicalQuery {
        CanonicalQuery {
            query_type: QueryIntent::Count,
            model_id: "u-1".into(),
            operations: vec!["select".into()],
            filters: vec![],
            fields: vec!["AD_ID".into()],
            grouping: None,
            metadata: Map::new(),
            hints: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_count_message_shape() {
        let generator = ResponseGenerator::new(None);
        let records = vec![record(&[("AD_ID", "1")]); 6];
        let response = generator
            .generate("how many products is Sony advertising?", &count_query(), &set(records))
            .await;
        assert_eq!(response.response_type, "COUNT");
        assert_eq!(response.message, "I found 6 products.");
        assert_eq!(response.count, Some(6));
    }

    #[tokio::test]
    async fn test_list_shows_business_values_not_ids() {
        let generator = ResponseGenerator::new(None);
        let mut query = count_query();
        query.query_type = QueryIntent::List;
        let records = vec![
            record(&[("_record_id", "r-1"), ("ADVERTISER", "Sony"), ("PRODUCT", "ZV-E10 II")]),
            record(&[("_record_id", "r-2"), ("ADVERTISER", "Sony"), ("PRODUCT", "Bravia 8")]),
        ];
        let response = generator
            .generate("what products is Sony advertising?", &query, &set(records))
            .await;
        assert_eq!(response.response_type, "LIST");
        assert!(response.message.contains("Sony - ZV-E10 II"));
        assert!(response.message.contains("Sony - Bravia 8"));
        assert!(!response.message.contains("r-1"));
    }

    #[tokio::test]
    async fn test_user_records_render_full_names() {
        let generator = ResponseGenerator::new(None);
        let mut query = count_query();
        query.query_type = QueryIntent::List;
        let records = vec![record(&[
            ("_record_id", "r-1"),
            ("FIRSTNAME", "Jane"),
            ("LASTNAME", "Doe"),
        ])];
        let response = generator.generate("list users", &query, &set(records)).await;
        assert!(response.message.contains("Jane Doe"));
    }

    #[tokio::test]
    async fn test_list_caps_at_ten_with_more_marker() {
        let generator = ResponseGenerator::new(None);
        let mut query = count_query();
        query.query_type = QueryIntent::List;
        let records: Vec<_> = (0..25)
            .map(|i| record(&[("PRODUCT", &format!("Item {i}")[..]), ("ADVERTISER", "Acme")]))
            .collect();
        let response = generator.generate("list products", &query, &set(records)).await;
        assert!(response.message.contains("(25 total)"));
        assert!(response.message.contains("... and 15 more items."));
        assert!(response.message.contains("10. "));
        assert!(!response.message.contains("11. "));
    }

    #[tokio::test]
    async fn test_empty_result_message() {
        let generator = ResponseGenerator::new(None);
        let mut query = count_query();
        query.query_type = QueryIntent::List;
        let response = generator.generate("list products", &query, &set(vec![])).await;
        assert_eq!(response.item_count, Some(0));
        assert!(response.message.contains("didn't find any results"));
    }

    #[tokio::test]
    async fn test_large_dataset_becomes_summary() {
        let generator = ResponseGenerator::new(None);
        let mut query = count_query();
        query.query_type = QueryIntent::List;
        let records: Vec<_> = (0..150)
            .map(|i| {
                record(&[
                    ("ADVERTISER", if i % 2 == 0 { "Sony" } else { "Samsung" }),
                    ("PRICE", &format!("{}", 10 + i)[..]),
                ])
            })
            .collect();
        let response = generator.generate("list ads", &query, &set(records)).await;
        assert_eq!(response.response_type, "SUMMARY");
        assert!(response.message.contains("150 results"));
        assert!(response.message.contains("ADVERTISER: 2 unique values"));
        assert!(response.message.contains("PRICE: min 10.00"));
    }

    #[tokio::test]
    async fn test_comparison_table() {
        let generator = ResponseGenerator::new(None);
        let mut query = count_query();
        query.query_type = QueryIntent::Compare;
        query.grouping = Some(Grouping {
            field: "ADVERTISER".into(),
            kind: "group_by".into(),
        });
        let records = vec![
            record(&[("ADVERTISER", "Sony")]),
            record(&[("ADVERTISER", "Sony")]),
            record(&[("ADVERTISER", "Samsung")]),
        ];
        let response = generator.generate("compare", &query, &set(records)).await;
        assert_eq!(response.response_type, "COMPARE");
        assert!(response.message.contains("Sony"));
        assert!(response.message.contains("| 2"));
        assert!(response.message.contains("Samsung"));
    }
}
