//! Model preset schema types.
//!
//! Persisted as camelCase JSON in `model_presets.json` (user store) and the
//! embedded built-in manifest. Maps are `BTreeMap` so the on-disk document
//! is byte-stable across rewrites.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reasoning / output shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    None,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    Auto,
    Concise,
    Detailed,
}

/// How a model produces reasoning output.
///
/// `hybridWithTokens` budgets an explicit thinking-token count;
/// `singleWithLevels` selects a named effort level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReasoningParams {
    #[serde(rename_all = "camelCase")]
    HybridWithTokens {
        tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_style: Option<SummaryStyle>,
    },
    #[serde(rename_all = "camelCase")]
    SingleWithLevels {
        level: ReasoningLevel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_style: Option<SummaryStyle>,
    },
}

/// Structured-output request shape. `text` carries no payload; `jsonSchema`
/// requires one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum OutputParam {
    Text,
    #[serde(rename_all = "camelCase")]
    JsonSchema { schema: OutputSchema },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Schema name: `^[A-Za-z0-9_-]{1,64}$`.
    pub name: String,
    pub schema: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model preset
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decoding/inference configuration for one model under a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreset {
    pub schema_version: String,
    pub id: String,
    pub name: String,
    pub slug: String,
    pub display_name: String,
    pub is_enabled: bool,
    pub is_built_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_prompt_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_length: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_param: Option<OutputParam>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider preset
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inference endpoint configuration plus the model presets it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPreset {
    pub schema_version: String,
    pub name: String,
    pub display_name: String,
    /// Which client SDK speaks to this endpoint (e.g. `"openai-compat"`).
    pub sdk_type: String,
    pub is_enabled: bool,
    pub is_built_in: bool,
    /// Endpoint origin, e.g. `https://api.example.com`.
    pub origin: String,
    pub chat_completion_path_prefix: String,
    #[serde(default)]
    pub api_key_header_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_headers: BTreeMap<String, String>,
    #[serde(
        rename = "defaultModelPresetID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_model_preset_id: Option<String>,
    #[serde(default)]
    pub model_presets: BTreeMap<String, ModelPreset>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// The whole user-side preset document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetsSchema {
    pub schema_version: String,
    #[serde(default)]
    pub default_provider: String,
    #[serde(default)]
    pub provider_presets: BTreeMap<String, ProviderPreset>,
}

impl Default for PresetsSchema {
    fn default() -> Self {
        Self {
            schema_version: crate::SCHEMA_VERSION.to_string(),
            default_provider: String::new(),
            provider_presets: BTreeMap::new(),
        }
    }
}
