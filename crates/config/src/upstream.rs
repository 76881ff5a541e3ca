//! Upstream service definitions.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Wire protocol an upstream service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// OpenAI Chat Completions.
    Openai,
    /// Anthropic Messages.
    Anthropic,
    /// Google Gemini generateContent.
    Gemini,
}

impl ServiceType {
    /// Lowercase name used in logs and the models listing.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Openai => "openai",
            ServiceType::Anthropic => "anthropic",
            ServiceType::Gemini => "gemini",
        }
    }
}

/// A single configured upstream LLM service.
///
/// Immutable for the lifetime of a configuration snapshot. Services with an
/// empty `api_key` are valid placeholders: they parse and persist, but the
/// router skips them at request time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamServiceConfig {
    /// Human-readable service name, unique per configuration.
    pub name: String,

    /// Which wire protocol this upstream speaks.
    pub service_type: ServiceType,

    /// Base URL of the upstream API, without a trailing slash.
    pub base_url: String,

    /// API key sent to the upstream. May be empty for placeholder entries.
    #[serde(default = "empty_key")]
    pub api_key: SecretString,

    /// Routing priority; higher is preferred. Ties resolve in declaration
    /// order.
    #[serde(default)]
    pub priority: i32,

    /// Models this service advertises. An empty list is a wildcard: the
    /// service accepts any requested model.
    #[serde(default)]
    pub models: Vec<String>,

    /// Client model name to upstream model name rewrites, applied before
    /// matching against `models`.
    #[serde(default)]
    pub model_mapping: BTreeMap<String, String>,

    /// Whether tool-calling injection is used for this service. `None`
    /// inherits `features.inject_function_calling`.
    #[serde(default)]
    pub inject_function_calling: Option<bool>,

    /// Use the shorter injected prompt variant for this service.
    #[serde(default)]
    pub optimize_prompt: bool,
}

fn empty_key() -> SecretString {
    SecretString::from("")
}

impl UpstreamServiceConfig {
    /// Whether this service carries a usable API key.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
    }

    /// Rewrites a client-requested model through `model_mapping`, falling
    /// back to the requested name.
    pub fn map_model<'a>(&'a self, requested: &'a str) -> &'a str {
        self.model_mapping
            .get(requested)
            .map(String::as_str)
            .unwrap_or(requested)
    }

    /// Whether this service advertises the given (already mapped) model.
    pub fn advertises(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}
