//! Upstream drivers: one per wire protocol an upstream may speak.

pub(crate) mod anthropic;
pub(crate) mod gemini;
pub(crate) mod openai;

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use config::{ServiceType, UpstreamServiceConfig};
use futures::Stream;
use secrecy::SecretString;

use crate::{
    error::{ProxyError, Result},
    messages::canonical::{ChatRequest, ChatResponse, Delta},
    request::RequestContext,
};

/// A finite stream of canonical deltas from one upstream response.
pub(crate) type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta>> + Send>>;

/// Forwarding interface implemented per upstream wire protocol.
#[async_trait]
pub(crate) trait UpstreamDriver: Send + Sync {
    /// Buffered round trip: encode, send, decode.
    async fn complete(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<ChatResponse>;

    /// Streaming round trip. Returns after the upstream accepted the request
    /// with a success status, so a failed initial status can still fail over.
    async fn stream(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<DeltaStream>;
}

/// Builds the driver matching a service's wire protocol.
pub(crate) fn driver_for(
    service: &UpstreamServiceConfig,
    connect_timeout: Duration,
) -> Box<dyn UpstreamDriver> {
    match service.service_type {
        ServiceType::Openai => Box::new(openai::OpenAiDriver::new(service.clone(), connect_timeout)),
        ServiceType::Anthropic => {
            Box::new(anthropic::AnthropicDriver::new(service.clone(), connect_timeout))
        }
        ServiceType::Gemini => Box::new(gemini::GeminiDriver::new(service.clone(), connect_timeout)),
    }
}

/// The key sent upstream: the client's own credential when passthrough is
/// enabled and one was presented, the configured service key otherwise.
pub(crate) fn auth_key(service: &UpstreamServiceConfig, ctx: &RequestContext) -> SecretString {
    if ctx.key_passthrough
        && let Some(client_key) = &ctx.client_key
    {
        return client_key.clone();
    }

    service.api_key.clone()
}

/// Drains a failed upstream response into the matching error class.
pub(crate) async fn error_from_response(
    service_name: &str,
    response: reqwest::Response,
) -> ProxyError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    log::error!("upstream '{service_name}' returned {status}: {body}");

    ProxyError::from_upstream_status(status, body)
}
