// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The staged agent pipeline.
//!
//! analyze → discover → map → build → retrieve → respond, each stage with a
//! single-method contract and per-stage metadata. Meta-queries about the
//! catalog short-circuit after analysis and never touch record retrieval.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::GatewayError;
use crate::domain::model::ModelDescriptor;
use crate::domain::principal::Principal;
use crate::domain::state::QueryIntent;
use crate::infrastructure::datahub::DataHubClient;

use super::agents::{
    DataRetrieval, FieldMapper, GeneratedResponse, ModelDiscovery, QueryAnalyzer, QueryBuilder,
    ResponseGenerator,
};

/// Result of one full pipeline run, including the intermediate artifacts
/// the workflow state records for audit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub response: GeneratedResponse,
    pub records: Value,
    pub metadata: Map<String, Value>,
    pub intent: QueryIntent,
    pub entities: Vec<crate::domain::query::Entity>,
    pub discovered_models: Vec<ModelDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructed_query: Option<crate::domain::query::CanonicalQuery>,
    pub field_mappings: Map<String, Value>,
}

pub struct AgentPipeline {
    analyzer: QueryAnalyzer,
    discovery: ModelDiscovery,
    mapper: FieldMapper,
    builder: QueryBuilder,
    retrieval: DataRetrieval,
    generator: ResponseGenerator,
    repository_id: String,
}

fn cancelled() -> GatewayError {
    GatewayError::Internal("request cancelled by client".into())
}

impl AgentPipeline {
    pub fn new(
        client: Arc<DataHubClient>,
        llm: Option<Arc<dyn crate::domain::llm::LlmProvider>>,
        repository_id: String,
        cache_capacity: Option<usize>,
    ) -> Self {
        let retrieval = match cache_capacity {
            Some(capacity) => DataRetrieval::with_cache(Arc::clone(&client), capacity),
            None => DataRetrieval::new(Arc::clone(&client)),
        };
        Self {
            analyzer: QueryAnalyzer::new(llm.clone()),
            discovery: ModelDiscovery::new(Arc::clone(&client)),
            mapper: FieldMapper::new(llm.clone()),
            builder: QueryBuilder::new(),
            retrieval,
            generator: ResponseGenerator::new(llm),
            repository_id,
        }
    }

    /// Run the full pipeline for one question.
    pub async fn process(
        &self,
        user_query: &str,
        principal: Option<&Principal>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, GatewayError> {
        let mut metadata = Map::new();

        // Stage 0: catalog snapshot for analysis and discovery.
        let available_models = self.discovery.get_all_models().await.unwrap_or_default();

        // Stage 1: query analysis.
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let analysis = self.analyzer.analyze(user_query, &available_models).await;
        metadata.insert(
            "query_analysis".into(),
            json!({
                "intent": analysis.intent.as_str(),
                "entities": analysis.entities.len(),
                "suggested_models": analysis.suggested_models,
            }),
        );
        if analysis.intent == QueryIntent::Unknown {
            return Err(GatewayError::QueryAnalysisFailed(
                "could not classify the question".into(),
            ));
        }

        // Meta-queries answer from the catalog alone.
        if analysis.is_meta_query || analysis.intent == QueryIntent::Meta {
            let response = self.meta_response(user_query, &available_models).await?;
            return Ok(PipelineOutcome {
                success: true,
                response,
                records: Value::Null,
                metadata,
                intent: QueryIntent::Meta,
                entities: analysis.entities,
                discovered_models: available_models,
                constructed_query: None,
                field_mappings: Map::new(),
            });
        }

        // Stage 2: model discovery.
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let ranked = self.discovery.find_relevant(&analysis, &available_models)?;
        let primary = self
            .discovery
            .load_fields(&ranked[0].descriptor.id)
            .await?;
        metadata.insert(
            "model_discovery".into(),
            json!({
                "primary_model": primary.id,
                "model_count": ranked.len(),
            }),
        );

        if let Some(principal) = principal {
            if !principal.can_access_model(&primary.name) {
                return Err(GatewayError::InsufficientScope {
                    required: format!("read:{}", primary.name.to_lowercase()),
                });
            }
        }

        // Stage 3: field mapping.
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let mapping = self
            .mapper
            .map_entities(&analysis.entities, &primary, user_query)
            .await;
        let validation = self.mapper.validate(&mapping);
        metadata.insert(
            "field_mapping".into(),
            json!({
                "mapped_entities": mapping.len(),
                "low_confidence": validation.low_confidence_mappings,
            }),
        );

        // Stage 4: query building.
        let query = self.builder.build(&analysis, &mapping, &primary)?;
        metadata.insert(
            "query_building".into(),
            json!({
                "query_type": query.query_type.as_str(),
                "filters_applied": query.filters.len(),
                "fields": query.fields,
            }),
        );

        // Stage 5: data retrieval.
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let set = self.retrieval.execute(&query, &self.repository_id).await?;
        metadata.insert(
            "data_retrieval".into(),
            json!({
                "records_returned": set.total_returned,
                "total_count": set.total_count,
                "has_more": set.has_more,
            }),
        );

        // Stage 6: response generation. Always yields a non-empty answer.
        let response = self.generator.generate(user_query, &query, &set).await;
        metadata.insert(
            "response_generation".into(),
            json!({
                "response_type": response.response_type,
                "message_length": response.message.len(),
            }),
        );

        let field_mappings: Map<String, Value> = mapping
            .iter()
            .map(|(entity, m)| {
                (
                    entity.clone(),
                    serde_json::to_value(m).unwrap_or(Value::Null),
                )
            })
            .collect();

        Ok(PipelineOutcome {
            success: true,
            response,
            records: serde_json::to_value(&set).unwrap_or(Value::Null),
            metadata,
            intent: analysis.intent,
            entities: analysis.entities,
            discovered_models: ranked.into_iter().map(|r| r.descriptor).collect(),
            constructed_query: Some(query),
            field_mappings,
        })
    }

    /// Catalog answers: model listing or a field listing for one model.
    async fn meta_response(
        &self,
        user_query: &str,
        models: &[ModelDescriptor],
    ) -> Result<GeneratedResponse, GatewayError> {
        let lowered = user_query.to_lowercase();
        let wants_fields = lowered.contains("field");

        if wants_fields {
            if let Some(target) = models.iter().find(|m| {
                let name = m.name.to_lowercase();
                let singular = name.trim_end_matches('s').to_string();
                lowered.contains(&name) || (!singular.is_empty() && lowered.contains(&singular))
            }) {
                let detailed = self.discovery.load_fields(&target.id).await?;
                let mut lines: Vec<String> = detailed
                    .fields
                    .iter()
                    .map(|f| format!("- {} ({})", f.name, f.field_type))
                    .collect();
                if lines.is_empty() {
                    lines.push("- (no fields published)".into());
                }
                return Ok(GeneratedResponse {
                    response_type: "META".into(),
                    message: format!(
                        "The {} model has {} fields:\n{}",
                        detailed.name,
                        detailed.fields.len(),
                        lines.join("\n")
                    ),
                    count: Some(detailed.fields.len()),
                    item_count: None,
                    data_preview: Vec::new(),
                });
            }
        }

        let published: Vec<&ModelDescriptor> = models.iter().filter(|m| m.is_published()).collect();
        let mut lines: Vec<String> = published
            .iter()
            .map(|m| format!("- {} (version {})", m.name, m.latest_version.as_deref().unwrap_or("-")))
            .collect();
        if lines.is_empty() {
            lines.push("- (no published models)".into());
        }
        Ok(GeneratedResponse {
            response_type: "META".into(),
            message: format!(
                "There are {} published data models available:\n{}",
                published.len(),
                lines.join("\n")
            ),
            count: Some(published.len()),
            item_count: None,
            data_preview: Vec::new(),
        })
    }
}
