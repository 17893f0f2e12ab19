// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Threat-detection value objects.
//!
//! Shared vocabulary between the rule-based detector, the semantic
//! analyzer, and the hybrid advisory layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Threat severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Confidence weight used when rolling matches into a score.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Critical => 1.0,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Security response actions, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    LogOnly,
    BlockRequest,
    BlockAndThrottle,
    BlockAndAlert,
}

impl ResponseAction {
    pub fn severity(self) -> u8 {
        match self {
            Self::LogOnly => 0,
            Self::BlockRequest => 1,
            Self::BlockAndThrottle => 2,
            Self::BlockAndAlert => 3,
        }
    }

    pub fn blocks(self) -> bool {
        self.severity() >= Self::BlockRequest.severity()
    }
}

/// A single detection rule. Patterns are compiled once at startup.
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub threat_level: ThreatLevel,
    pub action: ResponseAction,
    pub description: &'static str,
    pub case_sensitive: bool,
}

/// Verdict of the rule-based detector for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_threat: bool,
    pub threat_level: ThreatLevel,
    pub matched_rules: Vec<String>,
    pub confidence_score: f64,
    pub recommended_action: ResponseAction,
    /// Truncated excerpt of the analyzed content for audit.
    pub content_snippet: String,
    pub details: serde_json::Map<String, Value>,
}

impl DetectionResult {
    pub fn clean(content_snippet: String) -> Self {
        Self {
            is_threat: false,
            threat_level: ThreatLevel::Low,
            matched_rules: Vec::new(),
            confidence_score: 0.0,
            recommended_action: ResponseAction::LogOnly,
            content_snippet,
            details: serde_json::Map::new(),
        }
    }

    pub fn should_block(&self) -> bool {
        self.recommended_action.blocks()
    }
}

/// Semantic threat taxonomy shared with the advisory LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticThreatType {
    PromptInjection,
    RoleConfusion,
    SystemPromptExtraction,
    SocialEngineering,
    ContextManipulation,
    InstructionOverride,
    AuthorityClaim,
    UrgencyManipulation,
}

/// Action vocabulary returned by the advisory LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityAction {
    BlockImmediately,
    BlockWithWarning,
    MonitorClosely,
    AllowProcessing,
}

/// Structured verdict expected from the advisory LLM.
///
/// Parsed strictly; anything that does not fit this shape falls back to
/// the rule-based verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryVerdict {
    pub is_threat: bool,
    pub confidence: f64,
    #[serde(default)]
    pub threat_types: Vec<SemanticThreatType>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub subtlety_score: f64,
    #[serde(default)]
    pub business_legitimacy: f64,
    #[serde(default = "default_security_action")]
    pub security_action: SecurityAction,
}

fn default_security_action() -> SecurityAction {
    SecurityAction::AllowProcessing
}

/// Combined verdict of the rule scorer and (optionally) the advisory LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticAssessment {
    pub is_threat: bool,
    pub threat_types: Vec<SemanticThreatType>,
    pub combined_confidence: f64,
    pub matched_patterns: Vec<String>,
    pub recommended_action: SecurityAction,
    pub explanation: String,
    /// Set when the advisory LLM was unreachable or unparseable.
    pub advisory_unavailable: bool,
    pub cache_hit: bool,
}
