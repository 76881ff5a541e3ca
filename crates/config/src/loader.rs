use std::{collections::HashSet, path::Path};

use anyhow::bail;
use indoc::indoc;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;

    validate_has_upstreams(&config)?;
    validate_unique_names(&config)?;

    if config.client_authentication.allowed_keys.is_empty() {
        log::warn!("client_authentication.allowed_keys is empty, all client keys are accepted");
    }

    for service in &config.upstream_services {
        if !service.has_api_key() {
            log::warn!(
                "upstream service '{}' has no api_key and will be skipped at request time",
                service.name
            );
        }
    }

    Ok(config)
}

pub(crate) fn validate_has_upstreams(config: &Config) -> anyhow::Result<()> {
    if config.upstream_services.is_empty() {
        bail!(indoc! {r#"
            No upstream services configured. Toolify requires at least one upstream to proxy requests to.

            Example configuration:

              [[upstream_services]]
              name = "openai-primary"
              service_type = "openai"
              base_url = "https://api.openai.com/v1"
              api_key = "sk-..."
              priority = 100
              models = ["gpt-4o"]
        "#});
    }

    Ok(())
}

fn validate_unique_names(config: &Config) -> anyhow::Result<()> {
    let mut seen = HashSet::new();

    for service in &config.upstream_services {
        if !seen.insert(service.name.as_str()) {
            bail!("duplicate upstream service name '{}'", service.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::Config;

    #[test]
    fn rejects_duplicate_service_names() {
        let config: Config = toml::from_str(
            r#"
            [[upstream_services]]
            name = "same"
            service_type = "openai"
            base_url = "https://one.example"

            [[upstream_services]]
            name = "same"
            service_type = "anthropic"
            base_url = "https://two.example"
        "#,
        )
        .unwrap();

        let error = super::validate_unique_names(&config).unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"duplicate upstream service name 'same'");
    }

    #[test]
    fn rejects_empty_upstreams() {
        let config: Config = toml::from_str("").unwrap();
        assert!(super::validate_has_upstreams(&config).is_err());
    }
}
