// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLM provider adapters (infrastructure side of the anti-corruption layer).

mod anthropic;

pub use anthropic::AnthropicAdapter;

use std::sync::Arc;

use crate::domain::llm::LlmProvider;
use crate::infrastructure::config::LlmConfig;

/// Build the configured provider, or `None` when the gateway should run
/// with rule-based fallbacks only.
pub fn build_provider(config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "anthropic" => {
            let api_key = config.api_key.clone()?;
            let adapter: Arc<dyn LlmProvider> = Arc::new(AnthropicAdapter::new(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
            ));
            Some(adapter)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_provider_disables_llm() {
        let config = LlmConfig::default();
        assert!(build_provider(&config).is_none());
    }

    #[test]
    fn test_anthropic_requires_api_key() {
        let mut config = LlmConfig::default();
        config.provider = "anthropic".into();
        assert!(build_provider(&config).is_none());
        config.api_key = Some("key".into());
        assert!(build_provider(&config).is_some());
    }
}
