//! Toolify configuration structures to map the toolify.toml configuration.

#![deny(missing_docs)]

mod auth;
mod features;
mod loader;
mod server;
mod shared;
mod upstream;

use std::path::Path;

pub use auth::{AdminAuthConfig, ClientAuthConfig};
pub use features::FeaturesConfig;
use serde::Deserialize;
pub use server::ServerConfig;
pub use shared::{ConfigHandle, SharedConfig};
pub use upstream::{ServiceType, UpstreamServiceConfig};

/// Main configuration structure for the Toolify proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream LLM services, in declaration order.
    pub upstream_services: Vec<UpstreamServiceConfig>,
    /// Client-facing API key authentication.
    pub client_authentication: ClientAuthConfig,
    /// Credentials for the external admin surface. Parsed and carried; no
    /// admin routes are served by this process.
    pub admin_authentication: Option<AdminAuthConfig>,
    /// Feature toggles and injection defaults.
    pub features: FeaturesConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration can serve at least one model.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_upstreams(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Config, ServiceType};

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.timeout.as_secs(), 180);
        assert_eq!(config.server.connect_timeout.as_secs(), 10);
        assert!(config.upstream_services.is_empty());
        assert!(config.client_authentication.allowed_keys.is_empty());
        assert!(config.admin_authentication.is_none());
        assert!(config.features.enable_function_calling);
        assert!(config.features.inject_function_calling);
        assert!(!config.features.optimize_prompt);
        assert!(!config.features.key_passthrough);
        assert!(!config.features.model_passthrough);
    }

    #[test]
    fn full_upstream_definition() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            timeout = 300

            [[upstream_services]]
            name = "openai-primary"
            service_type = "openai"
            base_url = "https://api.openai.com/v1"
            api_key = "sk-upstream"
            priority = 100
            models = ["gpt-4", "gpt-4o"]
            inject_function_calling = false
            optimize_prompt = true

            [upstream_services.model_mapping]
            "gpt-4" = "gpt-4-turbo"

            [client_authentication]
            allowed_keys = ["sk-client-1", "sk-client-2"]
        "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.timeout.as_secs(), 300);

        let service = &config.upstream_services[0];
        assert_eq!(service.name, "openai-primary");
        assert_eq!(service.service_type, ServiceType::Openai);
        assert_eq!(service.priority, 100);
        assert_eq!(service.models, vec!["gpt-4", "gpt-4o"]);
        assert_eq!(
            service.model_mapping.get("gpt-4").map(String::as_str),
            Some("gpt-4-turbo")
        );
        assert_eq!(service.inject_function_calling, Some(false));
        assert!(service.optimize_prompt);
        assert!(service.has_api_key());

        assert_eq!(config.client_authentication.allowed_keys.len(), 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = toml::from_str::<Config>("[server]\nlisten = \"nope\"").unwrap_err();

        assert!(error.to_string().contains("unknown field"));
    }
}
