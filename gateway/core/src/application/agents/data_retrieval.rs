// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Data retrieval: execute the canonical query against the hub, with an
//! optional in-process result cache keyed by the query fingerprint.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::domain::errors::GatewayError;
use crate::domain::query::CanonicalQuery;
use crate::infrastructure::datahub::{DataHubClient, RecordFilter, RecordQueryParams, RecordSet};

const DEFAULT_LIMIT: u32 = 100;

pub struct DataRetrieval {
    client: Arc<DataHubClient>,
    cache: Option<Mutex<LruCache<String, RecordSet>>>,
}

impl DataRetrieval {
    pub fn new(client: Arc<DataHubClient>) -> Self {
        Self {
            client,
            cache: None,
        }
    }

    pub fn with_cache(client: Arc<DataHubClient>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            client,
            cache: Some(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub async fn execute(
        &self,
        query: &CanonicalQuery,
        repository_id: &str,
    ) -> Result<RecordSet, GatewayError> {
        let fingerprint = query.fingerprint();
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(&fingerprint).cloned() {
                metrics::counter!("datagate_retrieval_cache_hits").increment(1);
                return Ok(hit);
            }
        }

        let params = RecordQueryParams {
            universe_id: query.model_id.clone(),
            repository_id: repository_id.to_string(),
            fields: query.fields.clone(),
            filters: query
                .filters
                .iter()
                .map(|f| RecordFilter {
                    field_id: f.field.clone(),
                    operator: f.operator.as_str().to_string(),
                    value: f.value.clone(),
                })
                .collect(),
            limit: DEFAULT_LIMIT,
            offset_token: String::new(),
        };

        let set = self.client.query_records(params).await?;
        if let Some(cache) = &self.cache {
            cache.lock().put(fingerprint, set.clone());
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::QueryIntent;
    use crate::infrastructure::audit::AuditHandle;
    use crate::infrastructure::config::MdhConfig;

    fn query() -> CanonicalQuery {
        CanonicalQuery {
            query_type: QueryIntent::List,
            model_id: "u-1".into(),
            operations: vec!["select".into()],
            filters: vec![],
            fields: vec!["AD_ID".into()],
            grouping: None,
            metadata: serde_json::Map::new(),
            hints: serde_json::Map::new(),
        }
    }

    const RESPONSE: &str = r#"<RecordQueryResponse resultCount="1" totalCount="1" offsetToken="">
  <Record recordId="r-1"><Fields><ad><AD_ID>A1</AD_ID></ad></Fields></Record>
</RecordQueryResponse>"#;

    #[tokio::test]
    async fn test_cache_avoids_second_upstream_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mdm/universes/u-1/records/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(RESPONSE)
            .expect(1)
            .create_async()
            .await;

        let client = Arc::new(DataHubClient::new(
            MdhConfig {
                base_url: server.url(),
                username: "u".into(),
                password: Some("p".into()),
                ..Default::default()
            },
            AuditHandle::disabled(),
        ));
        let retrieval = DataRetrieval::with_cache(client, 16);

        let first = retrieval.execute(&query(), "repo-1").await.unwrap();
        let second = retrieval.execute(&query(), "repo-1").await.unwrap();
        assert_eq!(first.total_returned, second.total_returned);
        mock.assert_async().await;
    }
}
