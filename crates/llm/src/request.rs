//! Client credential extraction and per-request context.

use axum::http::HeaderMap;
use config::Config;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::{ProxyError, Result},
    transcode::WireFormat,
};

/// Runtime context carried through one proxied request.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    /// The credential the client presented, kept for key passthrough.
    pub client_key: Option<SecretString>,

    /// Forward the client credential to the upstream instead of the
    /// configured service key.
    pub key_passthrough: bool,
}

/// Checks the client credential against `allowed_keys` and builds the
/// request context.
///
/// Each protocol carries the credential in its own idiomatic place: a bearer
/// token for OpenAI, `x-api-key` for Anthropic, and a `key` query parameter
/// (or `x-goog-api-key`) for Gemini. An empty `allowed_keys` list disables
/// the check.
pub(crate) fn authenticate(
    config: &Config,
    format: WireFormat,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<RequestContext> {
    let presented = extract_credential(format, headers, query_key);

    let allowed = &config.client_authentication.allowed_keys;
    if !allowed.is_empty() {
        let Some(key) = presented.as_deref() else {
            return Err(ProxyError::Unauthorized("missing API key".to_string()));
        };

        if !allowed.iter().any(|k| k.expose_secret() == key) {
            return Err(ProxyError::Unauthorized("unknown API key".to_string()));
        }
    }

    Ok(RequestContext {
        client_key: presented.map(SecretString::from),
        key_passthrough: config.features.key_passthrough,
    })
}

fn extract_credential(
    format: WireFormat,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Option<String> {
    match format {
        WireFormat::Openai => bearer_token(headers),
        WireFormat::Anthropic => header_value(headers, "x-api-key").or_else(|| bearer_token(headers)),
        WireFormat::Gemini => query_key
            .map(str::to_string)
            .or_else(|| header_value(headers, "x-goog-api-key"))
            .or_else(|| bearer_token(headers)),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(str::to_string))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
