//! Upstream candidate selection and the priority-ordered attempt loop.

use std::future::Future;

use config::{Config, UpstreamServiceConfig};

use crate::error::{ProxyError, Result};

/// One upstream service eligible for a request, with the model name it will
/// receive after `model_mapping`.
#[derive(Debug)]
pub(crate) struct Candidate<'a> {
    pub service: &'a UpstreamServiceConfig,
    pub model: String,
}

/// Computes the ordered attempt candidates for a requested model.
///
/// Per-service `model_mapping` rewrites the name before matching; services
/// with an empty `models` list are wildcards; keyless placeholder entries are
/// skipped. Candidates sort by descending priority, ties keeping declaration
/// order. With `model_passthrough` enabled the requested name is forwarded
/// verbatim, bypassing the mapping.
pub(crate) fn candidates<'a>(config: &'a Config, requested: &str) -> Vec<Candidate<'a>> {
    let mut out = Vec::new();

    for service in &config.upstream_services {
        let mapped = if config.features.model_passthrough {
            requested
        } else {
            service.map_model(requested)
        };

        if !service.advertises(mapped) {
            continue;
        }

        if !service.has_api_key() {
            log::debug!(
                "skipping upstream '{}' for model '{requested}': no api_key configured",
                service.name
            );
            continue;
        }

        out.push(Candidate {
            service,
            model: mapped.to_string(),
        });
    }

    // Stable sort: equal priorities keep configuration order.
    out.sort_by_key(|candidate| std::cmp::Reverse(candidate.service.priority));

    out
}

/// Runs `attempt` against each candidate in order.
///
/// Retriable failures (429, 5xx, network) move on to the next candidate;
/// terminal outcomes (2xx, 400/401/403/404) stop immediately. No candidate
/// is attempted twice. When every candidate fails retriably, the most recent
/// error is reported as [`ProxyError::UpstreamExhausted`].
pub(crate) async fn try_each<'a, T, F, Fut>(
    candidates: &'a [Candidate<'a>],
    requested_model: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(&'a Candidate<'a>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if candidates.is_empty() {
        return Err(ProxyError::ModelUnavailable(requested_model.to_string()));
    }

    let mut last_error: Option<ProxyError> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        log::debug!(
            "attempting upstream {}/{}: '{}' (priority {})",
            i + 1,
            candidates.len(),
            candidate.service.name,
            candidate.service.priority
        );

        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retriable() => {
                log::warn!(
                    "upstream '{}' failed retriably, trying next candidate: {error}",
                    candidate.service.name
                );
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    Err(ProxyError::UpstreamExhausted {
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidates attempted".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn test_config() -> Config {
        toml::from_str(indoc! {r#"
            [[upstream_services]]
            name = "backup"
            service_type = "openai"
            base_url = "https://backup.example/v1"
            api_key = "sk-b"
            priority = 50
            models = ["gpt-4"]

            [[upstream_services]]
            name = "primary"
            service_type = "openai"
            base_url = "https://primary.example/v1"
            api_key = "sk-p"
            priority = 100
            models = ["gpt-4"]

            [upstream_services.model_mapping]
            "gpt-4" = "gpt-4-turbo"

            [[upstream_services]]
            name = "keyless"
            service_type = "anthropic"
            base_url = "https://keyless.example/v1"
            priority = 200
            models = ["gpt-4"]

            [[upstream_services]]
            name = "wildcard"
            service_type = "gemini"
            base_url = "https://wildcard.example/v1beta"
            api_key = "sk-w"
            priority = 10
        "#})
        .unwrap()
    }

    #[test]
    fn candidates_sort_by_priority_and_apply_mapping() {
        let config = test_config();
        let candidates = candidates(&config, "gpt-4");

        let names: Vec<_> = candidates.iter().map(|c| c.service.name.as_str()).collect();
        assert_eq!(names, vec!["primary", "backup", "wildcard"]);

        // The keyless placeholder is skipped, the mapping rewrote the model
        // for primary, and the wildcard took the name as-is.
        assert_eq!(candidates[0].model, "gpt-4-turbo");
        assert_eq!(candidates[1].model, "gpt-4");
        assert_eq!(candidates[2].model, "gpt-4");
    }

    #[test]
    fn wildcard_catches_unknown_models() {
        let config = test_config();
        let candidates = candidates(&config, "some-other-model");

        let names: Vec<_> = candidates.iter().map(|c| c.service.name.as_str()).collect();
        assert_eq!(names, vec!["wildcard"]);
    }

    #[test]
    fn ties_keep_declaration_order() {
        let config: Config = toml::from_str(indoc! {r#"
            [[upstream_services]]
            name = "first"
            service_type = "openai"
            base_url = "https://one.example/v1"
            api_key = "sk-1"
            priority = 10

            [[upstream_services]]
            name = "second"
            service_type = "openai"
            base_url = "https://two.example/v1"
            api_key = "sk-2"
            priority = 10
        "#})
        .unwrap();

        let candidates = candidates(&config, "anything");
        let names: Vec<_> = candidates.iter().map(|c| c.service.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn model_passthrough_bypasses_mapping() {
        let mut config = test_config();
        config.features.model_passthrough = true;

        let candidates = candidates(&config, "gpt-4");
        assert!(candidates.iter().all(|c| c.model == "gpt-4"));
    }

    #[tokio::test]
    async fn failover_walks_priorities_once_each() {
        let config = test_config();
        let candidates = candidates(&config, "gpt-4");

        let mut attempted = Vec::new();
        let result = try_each(&candidates, "gpt-4", |candidate| {
            attempted.push(candidate.service.name.clone());
            let outcome = if candidate.service.name == "backup" {
                Ok("ok")
            } else {
                Err(ProxyError::RateLimited {
                    message: "slow down".into(),
                })
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempted, vec!["primary", "backup"]);
    }

    #[tokio::test]
    async fn non_retriable_errors_stop_the_loop() {
        let config = test_config();
        let candidates = candidates(&config, "gpt-4");

        let mut attempted = Vec::new();
        let result = try_each(&candidates, "gpt-4", |candidate| {
            attempted.push(candidate.service.name.clone());
            let outcome: Result<&str> = Err(ProxyError::UpstreamRefused {
                status: 401,
                message: "bad key".into(),
            });
            async move { outcome }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            ProxyError::UpstreamRefused { status: 401, .. }
        ));
        assert_eq!(attempted, vec!["primary"]);
    }

    #[tokio::test]
    async fn exhaustion_reports_the_last_error() {
        let config = test_config();
        let candidates = candidates(&config, "gpt-4");

        let result: Result<&str> = try_each(&candidates, "gpt-4", |candidate| {
            let message = format!("{} is down", candidate.service.name);
            async move { Err(ProxyError::Connection(message)) }
        })
        .await;

        let ProxyError::UpstreamExhausted { message } = result.unwrap_err() else {
            panic!("expected exhaustion");
        };
        assert!(message.contains("wildcard is down"));
    }

    #[tokio::test]
    async fn no_candidates_is_model_unavailable() {
        let result: Result<()> = try_each(&[], "ghost-model", |_| async { Ok(()) }).await;

        assert!(matches!(
            result.unwrap_err(),
            ProxyError::ModelUnavailable(model) if model == "ghost-model"
        ));
    }
}
