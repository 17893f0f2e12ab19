// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLM Provider Domain Interface (Anti-Corruption Layer)
//!
//! The gateway consults an LLM in two places: the advisory call inside the
//! hybrid semantic analyzer, and the optional phrasing/insight calls in the
//! agent pipeline. Both go through this trait so the rest of the system
//! never sees a vendor API. Implementations live in `infrastructure/llm/`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Domain interface for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion from the LLM.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LlmError>;

    /// Check if the provider is healthy and accessible.
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Options for LLM generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    /// Steer the model into emitting a bare JSON object. Provider
    /// adapters may prefill the reply so it starts at the opening brace.
    #[serde(default)]
    pub force_json: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: Some(0.1),
            stop_sequences: None,
            force_json: false,
        }
    }
}

impl GenerationOptions {
    /// Short, deterministic, JSON-steered settings for the security
    /// advisory call.
    pub fn advisory() -> Self {
        Self {
            max_tokens: Some(512),
            temperature: Some(0.0),
            stop_sequences: None,
            force_json: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: u32,
    pub finish_reason: FinishReason,
}

/// Reason why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

/// Errors that can occur during LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
