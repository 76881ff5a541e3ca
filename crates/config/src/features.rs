//! Feature toggles and injection defaults.

use serde::Deserialize;

/// Feature toggles and injection defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesConfig {
    /// Master switch for tool calling. When off, `tools` in client requests
    /// are dropped before forwarding.
    pub enable_function_calling: bool,

    /// Default for services that leave `inject_function_calling` unset: teach
    /// prompt-only upstreams to emit tool calls as XML.
    pub inject_function_calling: bool,

    /// Default for the shorter injected prompt variant.
    pub optimize_prompt: bool,

    /// Forward the client's own credential to the upstream instead of the
    /// configured `api_key`.
    pub key_passthrough: bool,

    /// Forward the requested model name verbatim to any wildcard upstream,
    /// even when no `model_mapping` entry matches.
    pub model_passthrough: bool,

    /// Log filter in `env_logger` syntax, e.g. `info` or `llm=debug`.
    pub log_level: String,

    /// Custom injected prompt template. `{tools}` is replaced by the rendered
    /// tool list. When unset, the built-in template is used.
    pub prompt_template: Option<String>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enable_function_calling: true,
            inject_function_calling: true,
            optimize_prompt: false,
            key_passthrough: false,
            model_passthrough: false,
            log_level: "info".to_string(),
            prompt_template: None,
        }
    }
}
