// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Datagate server binary
//!
//! Loads configuration, wires the request-processing plane, and serves the
//! HTTP/JSON-RPC surface. Exits non-zero on fatal configuration errors
//! (missing mandatory secret, unreachable audit directory).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use aegis_datagate_core::application::nodes::WorkflowNodes;
use aegis_datagate_core::application::pipeline::AgentPipeline;
use aegis_datagate_core::application::workflow::WorkflowEngine;
use aegis_datagate_core::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use aegis_datagate_core::domain::state::StateManager;
use aegis_datagate_core::infrastructure::advisory::HybridAnalyzer;
use aegis_datagate_core::infrastructure::audit::AuditSink;
use aegis_datagate_core::infrastructure::config::GatewayConfig;
use aegis_datagate_core::infrastructure::datahub::DataHubClient;
use aegis_datagate_core::infrastructure::llm::build_provider;
use aegis_datagate_core::infrastructure::oauth::OauthService;
use aegis_datagate_core::infrastructure::rate_limit::RateLimiter;
use aegis_datagate_core::infrastructure::revocation::RevocationStore;
use aegis_datagate_core::infrastructure::threat::ThreatDetector;
use aegis_datagate_core::presentation::api::{app, AppState};

const MAX_REVOKED_TOKENS: usize = 10_000;

/// AEGIS Datagate - policy-enforcing conversational data-access gateway
#[derive(Parser)]
#[command(name = "datagate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        env = "DATAGATE_CONFIG_PATH",
        value_name = "FILE",
        default_value = "datagate.yaml"
    )]
    config: PathBuf,

    /// Bind address (overrides server.bind_addr from the config)
    #[arg(long, env = "DATAGATE_BIND_ADDR")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        GatewayConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        info!(path = %cli.config.display(), "config file not found, using defaults");
        GatewayConfig::from_yaml("{}")?
    };
    config.validate().context("configuration validation failed")?;

    let bind_addr = cli.bind.unwrap_or(config.server.bind_addr);

    // Audit sink first; every other service logs through it.
    let sink = AuditSink::new(config.audit.directory.clone(), config.audit.retention_days);
    let (audit, _writer) = sink.spawn();
    audit.emit(
        AuditEvent::new(AuditEventType::ServerStartup, AuditSeverity::Info)
            .detail(
                "version",
                serde_json::Value::String(env!("CARGO_PKG_VERSION").into()),
            )
            .detail(
                "security_features",
                serde_json::json!([
                    "oauth2.1",
                    "audit_logging",
                    "rate_limiting",
                    "jailbreak_detection",
                    "hybrid_semantic_analysis",
                ]),
            ),
    );

    let llm = build_provider(&config.llm);
    if llm.is_none() {
        info!("no LLM provider configured, running with rule-based fallbacks");
    }

    let revocations = Arc::new(RevocationStore::new(MAX_REVOKED_TOKENS));
    let oauth = Arc::new(OauthService::new(
        config.oauth.clone(),
        Arc::clone(&revocations),
        audit.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(&config.security, audit.clone()));
    let threat = Arc::new(ThreatDetector::new());
    let semantic = Arc::new(HybridAnalyzer::new(
        &config.security,
        llm.clone(),
        Duration::from_secs(config.llm.advisory_timeout_seconds),
    ));
    let datahub = Arc::new(DataHubClient::new(config.mdh.clone(), audit.clone()));

    let repository_id = config.mdh.repository_id.clone().unwrap_or_default();
    let pipeline = Arc::new(AgentPipeline::new(
        Arc::clone(&datahub),
        llm.clone(),
        repository_id,
        Some(256),
    ));

    let engine = Arc::new(WorkflowEngine::new(WorkflowNodes {
        oauth: Arc::clone(&oauth),
        threat: Arc::clone(&threat),
        semantic,
        pipeline,
        llm,
        audit: audit.clone(),
        features: config.features,
        state_manager: StateManager::new(),
    }));

    let state = Arc::new(AppState {
        oauth,
        rate_limiter,
        threat,
        datahub,
        engine,
        audit: audit.clone(),
        config: Arc::new(config),
    });

    // Hourly housekeeping: expired revocation records and rotated audit
    // files past retention.
    {
        let revocations = Arc::clone(&revocations);
        let retention = AuditSink::new(
            state.config.audit.directory.clone(),
            state.config.audit.retention_days,
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = revocations.cleanup_expired();
                if removed > 0 {
                    info!(removed, "expired revocation records swept");
                }
                if let Err(e) = retention.enforce_retention() {
                    tracing::warn!(error = %e, "audit retention sweep failed");
                }
            }
        });
    }

    let router = app(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(%bind_addr, "datagate listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    audit.emit(
        AuditEvent::new(AuditEventType::ServerShutdown, AuditSeverity::Info)
            .detail("reason", serde_json::Value::String("normal_shutdown".into())),
    );
    info!("datagate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
