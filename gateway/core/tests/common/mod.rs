// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared fixtures for the integration suites: a fully wired gateway
//! backed by a mock master data hub and locally signed test tokens.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;

use aegis_datagate_core::application::nodes::WorkflowNodes;
use aegis_datagate_core::application::pipeline::AgentPipeline;
use aegis_datagate_core::application::workflow::WorkflowEngine;
use aegis_datagate_core::domain::state::StateManager;
use aegis_datagate_core::infrastructure::advisory::HybridAnalyzer;
use aegis_datagate_core::infrastructure::audit::AuditHandle;
use aegis_datagate_core::infrastructure::config::{
    FeatureFlags, GatewayConfig, MdhConfig, OauthConfig, SubjectEntry,
};
use aegis_datagate_core::infrastructure::datahub::DataHubClient;
use aegis_datagate_core::infrastructure::oauth::OauthService;
use aegis_datagate_core::infrastructure::rate_limit::RateLimiter;
use aegis_datagate_core::infrastructure::revocation::RevocationStore;
use aegis_datagate_core::infrastructure::threat::ThreatDetector;
use aegis_datagate_core::presentation::api::AppState;

pub const SECRET: &str = "integration-test-secret";
pub const ISSUER: &str = "https://auth.test";
pub const AUDIENCE: &str = "datagate";
pub const ADS_MODEL_ID: &str = "02367877-e560-4d82-b640-6a9f7ab96afa";

pub const MODEL_LIST: &str = r#"<mdm:Universes xmlns:mdm="http://m">
  <mdm:Universe>
    <mdm:id>02367877-e560-4d82-b640-6a9f7ab96afa</mdm:id>
    <mdm:name>Advertisements</mdm:name>
    <mdm:publicationStatus>true</mdm:publicationStatus>
    <mdm:latestVersion>3</mdm:latestVersion>
  </mdm:Universe>
</mdm:Universes>"#;

pub const MODEL_DETAIL: &str = r#"<mdm:Universe xmlns:mdm="http://m">
  <mdm:id>02367877-e560-4d82-b640-6a9f7ab96afa</mdm:id>
  <mdm:name>Advertisements</mdm:name>
  <mdm:version>3</mdm:version>
  <mdm:fields>
    <mdm:field name="AD_ID" type="STRING" uniqueId="AD_ID"/>
    <mdm:field name="ADVERTISER" type="STRING" uniqueId="ADVERTISER"/>
    <mdm:field name="PRODUCT" type="STRING" uniqueId="PRODUCT"/>
  </mdm:fields>
</mdm:Universe>"#;

pub const QUERY_RESPONSE: &str = r#"<RecordQueryResponse resultCount="2" totalCount="2" offsetToken="">
  <Record recordId="r-1">
    <Fields><ad><AD_ID>A1</AD_ID><ADVERTISER>Sony</ADVERTISER><PRODUCT>ZV-E10 II</PRODUCT></ad></Fields>
  </Record>
  <Record recordId="r-2">
    <Fields><ad><AD_ID>A2</AD_ID><ADVERTISER>Sony</ADVERTISER><PRODUCT>Bravia 8</PRODUCT></ad></Fields>
  </Record>
</RecordQueryResponse>"#;

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    aud: String,
    iss: String,
    exp: usize,
    iat: usize,
    jti: String,
}

/// A locally signed bearer token for the given subject.
pub fn token_for(subject: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TestClaims {
        sub: subject.to_string(),
        aud: AUDIENCE.into(),
        iss: ISSUER.into(),
        exp: (now + 3600) as usize,
        iat: now as usize,
        jti: format!("jti-{subject}-{now}"),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token encoding")
}

pub fn oauth_config() -> OauthConfig {
    let mut config = OauthConfig {
        introspection_url: None,
        issuer: ISSUER.into(),
        audience: AUDIENCE.into(),
        jwt_secret: Some(SECRET.into()),
        algorithm: "HS256".into(),
        ..Default::default()
    };
    config.subjects.insert(
        "sarah.chen".into(),
        SubjectEntry {
            scopes: vec!["read:all".into()],
            role: None,
        },
    );
    config.subjects.insert(
        "admin.ops".into(),
        SubjectEntry {
            scopes: vec!["read:all".into(), "write:all".into()],
            role: None,
        },
    );
    config.subjects.insert(
        "david.li".into(),
        SubjectEntry {
            scopes: vec!["read:advertisements".into()],
            role: None,
        },
    );
    config.subjects.insert(
        "alex.smith".into(),
        SubjectEntry {
            scopes: vec!["none".into()],
            role: None,
        },
    );
    config
        .clients
        .insert("gateway-client".into(), "client-secret".into());
    config
}

fn mdh_config(mdh_url: &str) -> MdhConfig {
    MdhConfig {
        base_url: mdh_url.to_string(),
        account_id: "acct-test".into(),
        username: "api-user".into(),
        password: Some("api-pass".into()),
        datahub_username: None,
        datahub_password: None,
        repository_id: Some("repo-1".into()),
    }
}

/// A fully wired gateway against a mock hub, with no LLM configured.
pub fn gateway_state(mdh_url: &str) -> Arc<AppState> {
    let mut config = GatewayConfig::from_yaml("{}").expect("default config");
    config.oauth = oauth_config();
    config.mdh = mdh_config(mdh_url);

    let audit = AuditHandle::disabled();
    let revocations = Arc::new(RevocationStore::new(1000));
    let oauth = Arc::new(OauthService::new(
        config.oauth.clone(),
        Arc::clone(&revocations),
        audit.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(&config.security, audit.clone()));
    let threat = Arc::new(ThreatDetector::new());
    let semantic = Arc::new(HybridAnalyzer::new(
        &config.security,
        None,
        Duration::from_secs(2),
    ));
    let datahub = Arc::new(DataHubClient::new(config.mdh.clone(), audit.clone()));
    let pipeline = Arc::new(AgentPipeline::new(
        Arc::clone(&datahub),
        None,
        "repo-1".into(),
        None,
    ));
    let engine = Arc::new(WorkflowEngine::new(WorkflowNodes {
        oauth: Arc::clone(&oauth),
        threat: Arc::clone(&threat),
        semantic,
        pipeline,
        llm: None,
        audit: audit.clone(),
        features: FeatureFlags {
            proactive_insights: false,
            follow_up_suggestions: false,
        },
        state_manager: StateManager::new(),
    }));

    Arc::new(AppState {
        oauth,
        rate_limiter,
        threat,
        datahub,
        engine,
        audit,
        config: Arc::new(config),
    })
}
