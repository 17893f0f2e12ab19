// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Master-data-hub model descriptors.
//!
//! Field names exposed downstream are upper-cased canonical identifiers;
//! the original spelling is preserved alongside for display.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Publish,
    Draft,
}

/// A single field of a remote data model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelField {
    /// Canonical upper-cased identifier used in queries and record maps.
    pub name: String,
    /// Field name exactly as the hub reported it.
    pub original_name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub repeatable: bool,
    pub unique_id: String,
}

/// A configured source feeding records into a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSource {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub allow_multiple_links: bool,
    pub default: bool,
}

/// Normalized descriptor of a remote data model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub publication_status: PublicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub fields: Vec<ModelField>,
    #[serde(default)]
    pub sources: Vec<ModelSource>,
    #[serde(default)]
    pub match_rule_count: usize,
    #[serde(default)]
    pub record_title_fields: Vec<String>,
}

impl ModelDescriptor {
    pub fn is_published(&self) -> bool {
        self.publication_status == PublicationStatus::Publish
    }

    /// Canonical (upper-cased) field names, in model order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Case-insensitive field lookup against the canonical names.
    pub fn has_field(&self, name: &str) -> bool {
        let wanted = name.to_uppercase();
        self.fields.iter().any(|f| f.name == wanted)
    }
}

impl ModelField {
    /// Build a field from the hub's spelling, canonicalizing the name.
    pub fn from_original(
        original_name: &str,
        field_type: &str,
        required: bool,
        repeatable: bool,
        unique_id: &str,
    ) -> Self {
        Self {
            name: original_name.to_uppercase(),
            original_name: original_name.to_string(),
            field_type: field_type.to_string(),
            required,
            repeatable,
            unique_id: unique_id.to_string(),
        }
    }
}
