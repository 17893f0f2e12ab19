// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Model discovery: rank catalog models by relevance to the analyzed query.

use std::sync::Arc;

use crate::domain::errors::GatewayError;
use crate::domain::model::ModelDescriptor;
use crate::domain::query::QueryAnalysis;
use crate::infrastructure::datahub::DataHubClient;

#[derive(Debug, Clone)]
pub struct RankedModel {
    pub descriptor: ModelDescriptor,
    pub relevance: f64,
    pub role: String,
}

pub struct ModelDiscovery {
    client: Arc<DataHubClient>,
}

impl ModelDiscovery {
    pub fn new(client: Arc<DataHubClient>) -> Self {
        Self { client }
    }

    pub async fn get_all_models(&self) -> Result<Vec<ModelDescriptor>, GatewayError> {
        self.client.get_all_models().await
    }

    /// Fetch the detailed descriptor (with fields) for the primary model.
    pub async fn load_fields(&self, model_id: &str) -> Result<ModelDescriptor, GatewayError> {
        self.client.get_model_by_id(model_id).await
    }

    /// Rank models against the analysis. Analyzer-suggested models are
    /// trusted first; otherwise relevance comes from name overlap with the
    /// query and its entities. An empty result is a hard error.
    pub fn find_relevant(
        &self,
        analysis: &QueryAnalysis,
        models: &[ModelDescriptor],
    ) -> Result<Vec<RankedModel>, GatewayError> {
        if !analysis.suggested_models.is_empty() {
            let mut ranked: Vec<RankedModel> = models
                .iter()
                .filter(|m| analysis.suggested_models.contains(&m.name))
                .map(|m| RankedModel {
                    descriptor: m.clone(),
                    relevance: 0.95,
                    role: "primary".into(),
                })
                .collect();
            if !ranked.is_empty() {
                for extra in ranked.iter_mut().skip(1) {
                    extra.role = "secondary".into();
                }
                return Ok(ranked);
            }
            tracing::debug!("suggested models not in catalog, falling back to ranking");
        }

        let mut scored: Vec<RankedModel> = models
            .iter()
            .filter_map(|model| {
                let relevance = self.score(analysis, model);
                (relevance > 0.0).then(|| RankedModel {
                    descriptor: model.clone(),
                    relevance,
                    role: "secondary".into(),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        match scored.first_mut() {
            Some(first) => {
                first.role = "primary".into();
                Ok(scored)
            }
            None => Err(GatewayError::ModelNotFound),
        }
    }

    fn score(&self, analysis: &QueryAnalysis, model: &ModelDescriptor) -> f64 {
        let name = model.name.to_lowercase();
        let singular = name.trim_end_matches('s');
        let query = analysis.original_query.to_lowercase();

        if query.contains(&name) || (!singular.is_empty() && query.contains(singular)) {
            return 0.9;
        }

        let mut score: f64 = 0.0;
        for entity in &analysis.entities {
            let text = entity.text.to_lowercase();
            let entity_singular = text.trim_end_matches('s');
            if name.contains(&text) || (!entity_singular.is_empty() && name.contains(entity_singular))
            {
                score = score.max(0.6);
            }
            if model
                .fields
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&text))
            {
                score = score.max(0.4);
            }
        }
        score
    }
}
