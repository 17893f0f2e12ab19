// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Authenticated client for the master data hub.
//!
//! Catalog calls and record queries use HTTP Basic auth; record queries may
//! carry distinct credentials when the hub separates query permissions from
//! catalog permissions. A 401 on the query path is reported with
//! troubleshooting metadata and is never retried.

use std::time::Duration;

use serde_json::{json, Value};

use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::domain::errors::GatewayError;
use crate::domain::model::ModelDescriptor;
use crate::infrastructure::audit::AuditHandle;
use crate::infrastructure::config::MdhConfig;

use super::xml;
use super::xml::RecordSet;

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const LIMIT_MIN: u32 = 1;
const LIMIT_MAX: u32 = 1000;

/// One record-query filter in wire vocabulary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecordFilter {
    #[serde(rename = "fieldId")]
    pub field_id: String,
    pub operator: String,
    pub value: String,
}

/// Parameters for a record query.
#[derive(Debug, Clone)]
pub struct RecordQueryParams {
    pub universe_id: String,
    pub repository_id: String,
    pub fields: Vec<String>,
    pub filters: Vec<RecordFilter>,
    pub limit: u32,
    pub offset_token: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub models_available: usize,
}

pub struct DataHubClient {
    http: reqwest::Client,
    config: MdhConfig,
    audit: AuditHandle,
}

impl DataHubClient {
    pub fn new(config: MdhConfig, audit: AuditHandle) -> Self {
        let http = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            audit,
        }
    }

    pub fn repository_id(&self) -> Option<&str> {
        self.config.repository_id.as_deref()
    }

    fn catalog_url(&self, path: &str) -> String {
        format!("{}/mdm{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn query_credentials(&self) -> (&str, Option<&str>) {
        match (
            self.config.datahub_username.as_deref(),
            self.config.datahub_password.as_deref(),
        ) {
            (Some(user), Some(pass)) => (user, Some(pass)),
            _ => (
                self.config.username.as_str(),
                self.config.password.as_deref(),
            ),
        }
    }

    fn map_transport_error(e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::MdhTimeout
        } else {
            GatewayError::MdhUpstreamError(e.to_string())
        }
    }

    async fn catalog_get(&self, path: &str) -> Result<String, GatewayError> {
        let response = self
            .http
            .get(self.catalog_url(path))
            .basic_auth(&self.config.username, self.config.password.as_deref())
            .header("Accept", "application/xml")
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::MdhUnauthorized);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::ModelNotFound);
        }
        if !status.is_success() {
            return Err(GatewayError::MdhUpstreamError(format!(
                "catalog returned {status}"
            )));
        }
        response.text().await.map_err(Self::map_transport_error)
    }

    /// All models known to the hub, normalized.
    pub async fn get_all_models(&self) -> Result<Vec<ModelDescriptor>, GatewayError> {
        let body = self.catalog_get("/universes").await?;
        xml::parse_model_list(&body)
    }

    /// One model with its full field list.
    pub async fn get_model_by_id(&self, model_id: &str) -> Result<ModelDescriptor, GatewayError> {
        let body = self.catalog_get(&format!("/universes/{model_id}")).await?;
        xml::parse_model(&body)
    }

    pub async fn get_model_fields(
        &self,
        model_id: &str,
    ) -> Result<Vec<crate::domain::model::ModelField>, GatewayError> {
        Ok(self.get_model_by_id(model_id).await?.fields)
    }

    /// Execute a record query.
    ///
    /// Limits are clamped to [1, 1000], field identifiers upper-cased, and
    /// filters referencing fields the model does not have are dropped with
    /// an audit entry rather than failing the query.
    pub async fn query_records(&self, params: RecordQueryParams) -> Result<RecordSet, GatewayError> {
        if params.universe_id.is_empty() || params.repository_id.is_empty() {
            return Err(GatewayError::QueryBuildInvalid(
                "universe_id and repository_id are required".into(),
            ));
        }
        let limit = params.limit.clamp(LIMIT_MIN, LIMIT_MAX);

        let mut fields: Vec<String> = params.fields.iter().map(|f| f.to_uppercase()).collect();
        let mut filters: Vec<RecordFilter> = params
            .filters
            .into_iter()
            .map(|mut f| {
                f.field_id = f.field_id.to_uppercase();
                f
            })
            .collect();

        // Field validation needs the model descriptor; fetch it only when
        // the caller left the view empty or supplied filters to validate.
        if fields.is_empty() || !filters.is_empty() {
            let model = self.get_model_by_id(&params.universe_id).await?;
            if fields.is_empty() {
                fields = model.fields.iter().map(|f| f.name.clone()).collect();
            }
            let before = filters.len();
            filters.retain(|f| model.has_field(&f.field_id));
            if filters.len() < before {
                self.audit.emit(
                    AuditEvent::new(AuditEventType::SuspiciousActivity, AuditSeverity::Warning)
                        .failure()
                        .detail("action", Value::String("unknown_filter_fields_dropped".into()))
                        .detail("model_id", Value::String(params.universe_id.clone()))
                        .detail("dropped", Value::from(before - filters.len())),
                );
            }
        }

        if fields.is_empty() {
            return Err(GatewayError::QueryBuildInvalid(
                "model has no queryable fields".into(),
            ));
        }

        let body = xml::build_record_query(&fields, &filters, limit, &params.offset_token);
        let url = self.catalog_url(&format!("/universes/{}/records/query", params.universe_id));
        let (user, pass) = self.query_credentials();

        let response = self
            .http
            .post(url)
            .query(&[("repositoryId", params.repository_id.as_str())])
            .basic_auth(user, pass)
            .header("Content-Type", "application/xml")
            .header("Accept", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.audit.emit(
                AuditEvent::new(AuditEventType::ApiFailure, AuditSeverity::Error)
                    .failure()
                    .detail("action", Value::String("datahub_query_unauthorized".into()))
                    .detail("model_id", Value::String(params.universe_id.clone())),
            );
            return Err(GatewayError::MdhUnauthorized);
        }
        if status.is_server_error() {
            return Err(GatewayError::MdhUpstreamError(format!(
                "record query returned {status}"
            )));
        }
        // Remaining 4xx are rejections of this query, never retryable.
        if !status.is_success() {
            return Err(GatewayError::QueryBuildInvalid(format!(
                "record query rejected with {status}"
            )));
        }

        let text = response.text().await.map_err(Self::map_transport_error)?;
        xml::parse_record_query_response(&text)
    }

    /// Connection health used by the `connection/test` resource.
    pub async fn test_connection(&self) -> ConnectionTestResult {
        match self.get_all_models().await {
            Ok(models) => ConnectionTestResult {
                success: true,
                status_code: Some(200),
                error: None,
                models_available: models.len(),
            },
            Err(e) => ConnectionTestResult {
                success: false,
                status_code: match &e {
                    GatewayError::MdhUnauthorized => Some(401),
                    _ => None,
                },
                error: Some(e.to_string()),
                models_available: 0,
            },
        }
    }
}

/// Troubleshooting payload for 401s on the record-query path. The catalog
/// API and the query API are permissioned separately on the hub, so this
/// is the most common integration failure.
pub fn unauthorized_troubleshooting(model_id: &str, has_query_credentials: bool) -> Value {
    json!({
        "issue": "DataHub query authentication failed",
        "possible_causes": [
            "Different permissions required for catalog vs record-query access",
            "Account lacks record-query permissions on this universe",
            "Universe or repository access restrictions",
        ],
        "next_steps": [
            "Configure separate query credentials (mdh.datahub_username / mdh.datahub_password)",
            "Verify query credentials with your hub administrator",
            "Confirm repository access for the configured account",
        ],
        "auth_info": {
            "catalog_api_works": "likely (model metadata was retrievable)",
            "record_query_fails": "yes (401 UNAUTHORIZED)",
            "model_id": model_id,
            "has_query_credentials": has_query_credentials,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server_url: &str) -> DataHubClient {
        DataHubClient::new(
            MdhConfig {
                base_url: server_url.to_string(),
                account_id: "acct-1".into(),
                username: "api-user".into(),
                password: Some("api-pass".into()),
                datahub_username: None,
                datahub_password: None,
                repository_id: Some("repo-1".into()),
            },
            AuditHandle::disabled(),
        )
    }

    const MODEL_LIST: &str = r#"<mdm:Universes xmlns:mdm="http://m">
  <mdm:Universe>
    <mdm:id>u-1</mdm:id>
    <mdm:name>Advertisements</mdm:name>
    <mdm:publicationStatus>true</mdm:publicationStatus>
    <mdm:latestVersion>3</mdm:latestVersion>
  </mdm:Universe>
</mdm:Universes>"#;

    const MODEL_DETAIL: &str = r#"<mdm:Universe xmlns:mdm="http://m">
  <mdm:id>u-1</mdm:id>
  <mdm:name>Advertisements</mdm:name>
  <mdm:version>3</mdm:version>
  <mdm:fields>
    <mdm:field name="AD_ID" type="STRING" uniqueId="AD_ID"/>
    <mdm:field name="ADVERTISER" type="STRING" uniqueId="ADVERTISER"/>
  </mdm:fields>
</mdm:Universe>"#;

    const QUERY_RESPONSE: &str = r#"<RecordQueryResponse resultCount="1" totalCount="1" offsetToken="">
  <Record recordId="r-1">
    <Fields><ad><AD_ID>A1</AD_ID><ADVERTISER>Sony</ADVERTISER></ad></Fields>
  </Record>
</RecordQueryResponse>"#;

    #[tokio::test]
    async fn test_get_all_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mdm/universes")
            .with_status(200)
            .with_body(MODEL_LIST)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let models = client.get_all_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "Advertisements");
    }

    #[tokio::test]
    async fn test_query_records_round_trip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mdm/universes/u-1")
            .with_status(200)
            .with_body(MODEL_DETAIL)
            .create_async()
            .await;
        let query_mock = server
            .mock("POST", "/mdm/universes/u-1/records/query")
            .match_query(mockito::Matcher::UrlEncoded(
                "repositoryId".into(),
                "repo-1".into(),
            ))
            .with_status(200)
            .with_body(QUERY_RESPONSE)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let set = client
            .query_records(RecordQueryParams {
                universe_id: "u-1".into(),
                repository_id: "repo-1".into(),
                fields: vec!["ad_id".into(), "advertiser".into()],
                filters: vec![RecordFilter {
                    field_id: "advertiser".into(),
                    operator: "EQUALS".into(),
                    value: "Sony".into(),
                }],
                limit: 5,
                offset_token: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(set.total_returned, 1);
        assert_eq!(set.records[0]["ADVERTISER"], "Sony");
        query_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_filter_fields_are_dropped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mdm/universes/u-1")
            .with_status(200)
            .with_body(MODEL_DETAIL)
            .create_async()
            .await;
        let query_mock = server
            .mock("POST", "/mdm/universes/u-1/records/query")
            .match_query(mockito::Matcher::Any)
            // The unknown filter is dropped, so no <filter> section remains.
            .match_body(mockito::Matcher::Exact(
                r#"<RecordQueryRequest limit="10" offsetToken=""><view><fieldId>AD_ID</fieldId></view></RecordQueryRequest>"#
                    .into(),
            ))
            .with_status(200)
            .with_body(QUERY_RESPONSE)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let set = client
            .query_records(RecordQueryParams {
                universe_id: "u-1".into(),
                repository_id: "repo-1".into(),
                fields: vec!["AD_ID".into()],
                filters: vec![RecordFilter {
                    field_id: "no_such_field".into(),
                    operator: "EQUALS".into(),
                    value: "x".into(),
                }],
                limit: 10,
                offset_token: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(set.total_returned, 1);
        query_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_401_is_unauthorized_not_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mdm/universes/u-1/records/query")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .query_records(RecordQueryParams {
                universe_id: "u-1".into(),
                repository_id: "repo-1".into(),
                fields: vec!["AD_ID".into()],
                filters: vec![],
                limit: 10,
                offset_token: String::new(),
            })
            .await
            .unwrap_err();
        // Field list non-empty and no filters: no catalog fetch happens,
        // the query 401 surfaces directly.
        assert_eq!(err.kind(), "MDH_UNAUTHORIZED");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_query_5xx_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mdm/universes/u-1/records/query")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .query_records(RecordQueryParams {
                universe_id: "u-1".into(),
                repository_id: "repo-1".into(),
                fields: vec!["AD_ID".into()],
                filters: vec![],
                limit: 10,
                offset_token: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MDH_UPSTREAM_ERROR");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bad_xml_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mdm/universes/u-1/records/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("{\"not\": \"xml\"}")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .query_records(RecordQueryParams {
                universe_id: "u-1".into(),
                repository_id: "repo-1".into(),
                fields: vec!["AD_ID".into()],
                filters: vec![],
                limit: 10,
                offset_token: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MDH_PARSE_ERROR");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_test_reports_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mdm/universes")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let result = client.test_connection().await;
        assert!(!result.success);
        assert_eq!(result.status_code, Some(401));
    }
}
